//! Aderyn LSP server entry point
//!
//! Runs the analyzer on a dedicated worker thread so the LSP message loop
//! stays responsive while a run is in flight.

use anyhow::{anyhow, Result};
use lsp_server::{Connection, Message};
use lsp_types::InitializeParams;
use std::{env, sync::mpsc, thread};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use aderyn_lsp::{
    scan::{RunStats, ScanContext, ScanRequest},
    server::{initial_config, server_capabilities},
    *,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() > 1 && (args[1] == "--version" || args[1] == "-V") {
        println!("aderyn-lsp {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Aderyn LSP server");

    let (connection, io_threads) = Connection::stdio();

    let capabilities = serde_json::to_value(server_capabilities())?;
    let init_params = connection.initialize(capabilities)?;
    let init_params: InitializeParams = serde_json::from_value(init_params)?;

    let config = initial_config(
        &connection.sender,
        init_params.initialization_options.clone(),
    )?;

    main_loop(connection, init_params, config)?;

    io_threads.join()?;
    info!("Shutting down Aderyn LSP server");
    Ok(())
}

fn main_loop(connection: Connection, init_params: InitializeParams, config: AderynConfig) -> Result<()> {
    info!("Starting main loop");

    let config = ConfigStore::new(config);
    let workspace_manager = WorkspaceManager::new(&init_params);
    let diagnostics_store = DiagnosticsStore::new();
    let stats = RunStats::new();
    let shutdown = CancellationToken::new();

    let (scan_tx, scan_rx) = mpsc::channel::<ScanRequest>();

    let manager = ScanManager::new(ScanContext {
        config: config.clone(),
        workspace: workspace_manager.clone(),
        store: diagnostics_store.clone(),
        sender: connection.sender.clone(),
        stats: stats.clone(),
        shutdown: shutdown.clone(),
    });
    let scan_thread = thread::spawn(move || manager.run(scan_rx));

    let server = AderynLspServer::new(
        workspace_manager,
        diagnostics_store,
        config,
        stats,
        scan_tx.clone(),
    );

    for msg in &connection.receiver {
        match msg {
            Message::Request(req) => {
                if connection.handle_shutdown(&req)? {
                    break;
                }
                server.process_request(&connection, req);
            }
            Message::Notification(not) => {
                server.process_notification(&connection, not);
            }
            Message::Response(_) => {}
        }
    }

    shutdown.cancel();
    let _ = scan_tx.send(ScanRequest::Shutdown);
    drop(server);

    scan_thread
        .join()
        .map_err(|_| anyhow!("Run worker panicked"))?;

    Ok(())
}
