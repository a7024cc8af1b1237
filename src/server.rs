//! LSP server implementation
//!
//! Routes protocol messages to the components that do the work: document
//! tracking, the configuration store, the run worker and the published
//! diagnostics. Nothing here runs the analyzer; runs are queued to the worker
//! and `aderyn.run` answers once the worker reports back, from a helper thread
//! so the message loop keeps moving.
//!
//! Command arguments arrive as `Vec<serde_json::Value>`; the helpers at the
//! bottom pull typed values out of them and report bad input as invalid
//! params.

use crate::{
    config::{AderynConfig, ConfigStore},
    diagnostics::DiagnosticsMapper,
    diagnostics_store::DiagnosticsStore,
    notify,
    proto::{commands, error_codes},
    scan::{RunRequest, RunStats, RunTrigger, ScanRequest},
    workspace::WorkspaceManager,
};
use anyhow::{anyhow, Result};
use crossbeam_channel::Sender;
use lsp_server::{Connection, Message, Notification, Request, RequestId, Response};
use lsp_types::{
    notification::{
        DidChangeConfiguration, DidChangeTextDocument, DidChangeWorkspaceFolders,
        DidCloseTextDocument, DidOpenTextDocument, DidSaveTextDocument, Initialized,
        Notification as _,
    },
    request::{ExecuteCommand, HoverRequest, Request as _},
    Diagnostic, ExecuteCommandOptions, ExecuteCommandParams, Hover, HoverContents,
    HoverParams, HoverProviderCapability, MarkupContent, MarkupKind, MessageType,
    SaveOptions, ServerCapabilities, TextDocumentSyncCapability, TextDocumentSyncKind,
    TextDocumentSyncOptions, TextDocumentSyncSaveOptions, Url, WorkDoneProgressOptions,
};
use std::{path::PathBuf, sync::mpsc, thread};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Bad command or request arguments. Answered with `-32602`.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct InvalidParams(pub String);

pub fn server_capabilities() -> ServerCapabilities {
    ServerCapabilities {
        text_document_sync: Some(TextDocumentSyncCapability::Options(
            TextDocumentSyncOptions {
                open_close: Some(true),
                change: Some(TextDocumentSyncKind::INCREMENTAL),
                save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                    include_text: Some(false),
                })),
                ..Default::default()
            },
        )),
        hover_provider: Some(HoverProviderCapability::Simple(true)),
        execute_command_provider: Some(ExecuteCommandOptions {
            commands: commands::ALL.iter().map(|c| c.to_string()).collect(),
            work_done_progress_options: WorkDoneProgressOptions {
                work_done_progress: Some(false),
            },
        }),
        workspace: Some(lsp_types::WorkspaceServerCapabilities {
            workspace_folders: Some(lsp_types::WorkspaceFoldersServerCapabilities {
                supported: Some(true),
                change_notifications: Some(lsp_types::OneOf::Left(true)),
            }),
            file_operations: None,
        }),
        ..Default::default()
    }
}

/// Configuration from the client's initialization options. Invalid options
/// fall back to the defaults and the user is told why.
pub fn initial_config(
    sender: &Sender<Message>,
    options: Option<serde_json::Value>,
) -> Result<AderynConfig> {
    let Some(options) = options else {
        return Ok(AderynConfig::default());
    };

    match AderynConfig::from_lsp_value(options) {
        Ok(config) => Ok(config),
        Err(e) => {
            warn!("Ignoring invalid initialization options: {}", e);
            notify::show_message(
                sender,
                MessageType::ERROR,
                format!("Aderyn: invalid initialization options, using defaults: {}", e),
            )?;
            Ok(AderynConfig::default())
        }
    }
}

pub struct AderynLspServer {
    workspace_manager: WorkspaceManager,
    diagnostics_store: DiagnosticsStore,
    diagnostics_mapper: DiagnosticsMapper,
    config: ConfigStore,
    stats: RunStats,
    scan_tx: mpsc::Sender<ScanRequest>,
}

impl AderynLspServer {
    pub fn new(
        workspace_manager: WorkspaceManager,
        diagnostics_store: DiagnosticsStore,
        config: ConfigStore,
        stats: RunStats,
        scan_tx: mpsc::Sender<ScanRequest>,
    ) -> Self {
        Self {
            workspace_manager,
            diagnostics_store,
            diagnostics_mapper: DiagnosticsMapper::new(),
            config,
            stats,
            scan_tx,
        }
    }

    pub fn process_request(&self, connection: &Connection, req: Request) {
        let req_id = req.id.clone();

        let result = match req.method.as_str() {
            ExecuteCommand::METHOD => self.handle_execute_command(connection, req),
            HoverRequest::METHOD => self.handle_hover(connection, req),
            _ => {
                debug!("Received unhandled request: {}", req.method);
                let response = Response::new_err(
                    req_id.clone(),
                    error_codes::METHOD_NOT_FOUND,
                    format!("Unhandled method: {}", req.method),
                );
                connection.sender.send(response.into()).map_err(Into::into)
            }
        };

        if let Err(e) = result {
            let code = if e.downcast_ref::<InvalidParams>().is_some() {
                error_codes::INVALID_PARAMS
            } else {
                error_codes::INTERNAL_ERROR
            };
            error!("Request {:?} failed: {}", req_id, e);
            let response = Response::new_err(req_id, code, e.to_string());
            let _ = connection.sender.send(response.into());
        }
    }

    pub fn process_notification(&self, connection: &Connection, not: Notification) {
        let method = not.method.clone();
        let result = match not.method.as_str() {
            Initialized::METHOD => self.handle_initialized(),
            DidOpenTextDocument::METHOD => self.handle_did_open(not),
            DidChangeTextDocument::METHOD => self.handle_did_change(not),
            DidCloseTextDocument::METHOD => self.handle_did_close(not),
            DidSaveTextDocument::METHOD => self.handle_did_save(not),
            DidChangeConfiguration::METHOD => self.handle_did_change_configuration(connection, not),
            DidChangeWorkspaceFolders::METHOD => self.handle_did_change_workspace_folders(not),
            _ => {
                debug!("Received unhandled notification: {}", method);
                Ok(())
            }
        };

        if let Err(e) = result {
            error!("Error processing notification {}: {}", method, e);
        }
    }

    fn handle_execute_command(&self, connection: &Connection, req: Request) -> Result<()> {
        let params: ExecuteCommandParams =
            serde_json::from_value(req.params).map_err(|e| InvalidParams(e.to_string()))?;
        let args = params.arguments.as_slice();

        debug!("Executing command {} with {} arguments", params.command, args.len());

        match params.command.as_str() {
            commands::TOGGLE => self.execute_toggle(connection, req.id),
            commands::RUN => self.execute_run(connection, req.id, args),
            commands::SHOW_DETAILS => self.execute_show_details(connection, req.id, args),
            commands::SET_MIN_SEVERITY => self.execute_set_min_severity(connection, req.id, args),
            commands::SHOW_CONFIG => self.execute_show_config(connection, req.id),
            other => Err(InvalidParams(format!("Unknown command: {}", other)).into()),
        }
    }

    fn execute_toggle(&self, connection: &Connection, req_id: RequestId) -> Result<()> {
        let enabled = self.config.toggle();

        if enabled {
            self.request_run(RunRequest::new(RunTrigger::Toggle))?;
        } else {
            let cleared = self.diagnostics_store.clear_all(&connection.sender)?;
            debug!("Cleared diagnostics from {} documents", cleared);
        }

        notify::show_message(
            &connection.sender,
            MessageType::INFO,
            format!("Aderyn {}", if enabled { "enabled" } else { "disabled" }),
        )?;

        let response = Response::new_ok(req_id, serde_json::json!({ "enabled": enabled }));
        connection.sender.send(response.into())?;
        Ok(())
    }

    fn execute_run(
        &self,
        connection: &Connection,
        req_id: RequestId,
        args: &[serde_json::Value],
    ) -> Result<()> {
        let start_path = args.first().map(Self::extract_path_from_value).transpose()?;

        let (response_tx, response_rx) = mpsc::channel();
        self.request_run(
            RunRequest::new(RunTrigger::Command)
                .with_start_path(start_path)
                .with_response(response_tx),
        )?;

        let connection_sender = connection.sender.clone();
        thread::spawn(move || {
            let response = match response_rx.recv() {
                Ok(outcome) => Response::new_ok(req_id, outcome),
                Err(e) => Response::new_err(
                    req_id,
                    error_codes::INTERNAL_ERROR,
                    format!("Run worker stopped before answering: {}", e),
                ),
            };
            let _ = connection_sender.send(response.into());
        });

        Ok(())
    }

    fn execute_show_details(
        &self,
        connection: &Connection,
        req_id: RequestId,
        args: &[serde_json::Value],
    ) -> Result<()> {
        let (uri, line) = Self::extract_position(args)?;

        let result = match self.details_at(&uri, line) {
            Some((_, contents)) => serde_json::json!({ "found": true, "contents": contents }),
            None => {
                notify::show_message(
                    &connection.sender,
                    MessageType::INFO,
                    "Aderyn: nothing found under the cursor",
                )?;
                serde_json::json!({ "found": false })
            }
        };

        connection.sender.send(Response::new_ok(req_id, result).into())?;
        Ok(())
    }

    fn execute_set_min_severity(
        &self,
        connection: &Connection,
        req_id: RequestId,
        args: &[serde_json::Value],
    ) -> Result<()> {
        let level = args
            .first()
            .ok_or_else(|| InvalidParams("Missing severity argument".to_string()))?;

        let severity = match self.config.set_min_severity(level) {
            Ok(severity) => severity,
            Err(e) => {
                notify::show_message(&connection.sender, MessageType::ERROR, format!("Aderyn: {}", e))?;
                return Err(InvalidParams(e.to_string()).into());
            }
        };

        if self.config.is_enabled() {
            self.request_run(RunRequest::new(RunTrigger::SeverityChanged))?;
        }

        let response = Response::new_ok(req_id, serde_json::json!({ "min_severity": severity }));
        connection.sender.send(response.into())?;
        Ok(())
    }

    fn execute_show_config(&self, connection: &Connection, req_id: RequestId) -> Result<()> {
        let report = serde_json::json!({
            "config": self.config.snapshot(),
            "stats": self.stats.snapshot(),
            "workspace": self.workspace_manager.get_stats(),
            "published_documents": self.diagnostics_store.published_uris().len(),
            "published_diagnostics": self.diagnostics_store.total_count(),
        });

        notify::log_message(
            &connection.sender,
            MessageType::INFO,
            serde_json::to_string_pretty(&report)?,
        )?;

        connection.sender.send(Response::new_ok(req_id, report).into())?;
        Ok(())
    }

    fn handle_hover(&self, connection: &Connection, req: Request) -> Result<()> {
        let params: HoverParams =
            serde_json::from_value(req.params).map_err(|e| InvalidParams(e.to_string()))?;
        let position = params.text_document_position_params;

        let hover = self
            .details_at(&position.text_document.uri, position.position.line)
            .map(|(diagnostic, contents)| Hover {
                contents: HoverContents::Markup(MarkupContent {
                    kind: MarkupKind::Markdown,
                    value: contents,
                }),
                range: Some(diagnostic.range),
            });

        connection.sender.send(Response::new_ok(req.id, hover).into())?;
        Ok(())
    }

    /// The published diagnostic covering `line` and its rendered detail panel.
    pub fn details_at(&self, uri: &Url, line: u32) -> Option<(Diagnostic, String)> {
        let diagnostic = self.diagnostics_store.find_at_line(uri, line)?;
        let contents = self.diagnostics_mapper.render_details(&diagnostic)?;
        Some((diagnostic, contents))
    }

    fn handle_initialized(&self) -> Result<()> {
        let config = self.config.snapshot();
        if config.enabled && config.run_on_start {
            info!("Client initialized, starting initial run");
            self.request_run(RunRequest::new(RunTrigger::Startup))?;
        }
        Ok(())
    }

    fn handle_did_open(&self, not: Notification) -> Result<()> {
        let params: lsp_types::DidOpenTextDocumentParams = serde_json::from_value(not.params)?;
        debug!("Document opened: {}", params.text_document.uri);
        self.workspace_manager.add_document(params.text_document);
        Ok(())
    }

    fn handle_did_change(&self, not: Notification) -> Result<()> {
        let params: lsp_types::DidChangeTextDocumentParams = serde_json::from_value(not.params)?;

        self.workspace_manager
            .update_document(&params.text_document.uri, params.text_document.version)
    }

    fn handle_did_close(&self, not: Notification) -> Result<()> {
        let params: lsp_types::DidCloseTextDocumentParams = serde_json::from_value(not.params)?;
        debug!("Document closed: {}", params.text_document.uri);
        self.workspace_manager
            .remove_document(&params.text_document.uri);
        Ok(())
    }

    fn handle_did_save(&self, not: Notification) -> Result<()> {
        let params: lsp_types::DidSaveTextDocumentParams = serde_json::from_value(not.params)?;
        let uri = params.text_document.uri;

        let config = self.config.snapshot();
        if !config.enabled || !config.run_on_save {
            return Ok(());
        }

        let language_id = self
            .workspace_manager
            .get_document(&uri)
            .map(|doc| doc.language_id)
            .unwrap_or_default();
        if !WorkspaceManager::is_watched(&uri, &language_id, &config.filetypes) {
            debug!("Saved document {} is not a watched file type", uri);
            return Ok(());
        }

        debug!("Watched document saved: {}", uri);
        let start_path = uri.to_file_path().ok();
        self.request_run(RunRequest::new(RunTrigger::Save).with_start_path(start_path))
    }

    fn handle_did_change_configuration(&self, connection: &Connection, not: Notification) -> Result<()> {
        let params: lsp_types::DidChangeConfigurationParams = serde_json::from_value(not.params)?;

        let change = match self.config.setup(params.settings) {
            Ok(change) => change,
            Err(e) => {
                notify::show_message(
                    &connection.sender,
                    MessageType::ERROR,
                    format!("Aderyn: invalid configuration: {}", e),
                )?;
                return Err(e.into());
            }
        };

        if change.disabled() {
            let cleared = self.diagnostics_store.clear_all(&connection.sender)?;
            debug!("Settings disabled analysis, cleared {} documents", cleared);
        } else if self.config.is_enabled() && (change.enabled.is_some() || change.rerun_needed) {
            self.request_run(RunRequest::new(RunTrigger::SettingsChanged))?;
        }
        Ok(())
    }

    fn handle_did_change_workspace_folders(&self, not: Notification) -> Result<()> {
        let params: lsp_types::DidChangeWorkspaceFoldersParams = serde_json::from_value(not.params)?;

        let mut folders = self.workspace_manager.get_workspace_folders();
        folders.retain(|f| !params.event.removed.iter().any(|r| r.uri == f.uri));
        folders.extend(params.event.added);
        self.workspace_manager.update_workspace_folders(folders);
        Ok(())
    }

    fn request_run(&self, request: RunRequest) -> Result<()> {
        debug!("Queueing run ({:?})", request.trigger);
        self.scan_tx
            .send(ScanRequest::Run(request))
            .map_err(|_| anyhow!("Run worker is not running"))
    }

    fn extract_path_from_value(value: &serde_json::Value) -> Result<PathBuf> {
        if let Some(path_str) = value.as_str() {
            return if path_str.starts_with("file://") {
                Self::uri_to_path(path_str)
            } else {
                Ok(PathBuf::from(path_str))
            };
        }

        if let Some(obj) = value.as_object() {
            if let Some(fs_path) = obj.get("fsPath").and_then(|v| v.as_str()) {
                return Ok(PathBuf::from(fs_path));
            }
            if let Some(uri) = obj.get("uri").and_then(|v| v.as_str()) {
                return Self::uri_to_path(uri);
            }
            if let Some(path) = obj.get("path").and_then(|v| v.as_str()) {
                return Ok(PathBuf::from(path));
            }
            return Err(InvalidParams("Path object has no recognizable path field".to_string()).into());
        }

        Err(InvalidParams("Invalid path argument: expected string or URI object".to_string()).into())
    }

    fn uri_to_path(uri: &str) -> Result<PathBuf> {
        Url::parse(uri)
            .ok()
            .and_then(|u| u.to_file_path().ok())
            .ok_or_else(|| InvalidParams(format!("Invalid file URI: {}", uri)).into())
    }

    fn value_to_uri(value: &serde_json::Value) -> Result<Url> {
        let raw = value
            .as_str()
            .ok_or_else(|| InvalidParams("Document must be a URI string".to_string()))?;

        if raw.contains("://") {
            Url::parse(raw).map_err(|e| InvalidParams(format!("Invalid URI {}: {}", raw, e)).into())
        } else {
            Url::from_file_path(raw)
                .map_err(|_| InvalidParams(format!("Not an absolute path: {}", raw)).into())
        }
    }

    fn value_to_line(value: &serde_json::Value) -> Result<u32> {
        value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| InvalidParams(format!("Invalid line: {}", value)).into())
    }

    /// Accepts `[uri, line]`, `[{uri, line}]` or `[{textDocument: {uri},
    /// position: {line}}]`. Lines are 0-based.
    fn extract_position(args: &[serde_json::Value]) -> Result<(Url, u32)> {
        match args {
            [uri, line, ..] => Ok((Self::value_to_uri(uri)?, Self::value_to_line(line)?)),
            [serde_json::Value::Object(obj)] => {
                let uri = obj
                    .get("uri")
                    .or_else(|| obj.get("textDocument").and_then(|td| td.get("uri")))
                    .ok_or_else(|| InvalidParams("Missing document URI".to_string()))?;
                let line = obj
                    .get("line")
                    .or_else(|| obj.get("position").and_then(|p| p.get("line")))
                    .ok_or_else(|| InvalidParams("Missing line".to_string()))?;
                Ok((Self::value_to_uri(uri)?, Self::value_to_line(line)?))
            }
            _ => Err(InvalidParams("Expected [uri, line]".to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        proto::{DiagnosticRecord, RecordMetadata, Severity, END_OF_LINE},
    };
    use lsp_types::{
        notification::{PublishDiagnostics, ShowMessage},
        InitializeParams, TextDocumentItem,
    };
    use serde_json::json;
    use std::{collections::HashMap, time::Duration};

    struct Fixture {
        server: AderynLspServer,
        connection: Connection,
        client: Connection,
        scan_rx: mpsc::Receiver<ScanRequest>,
        store: DiagnosticsStore,
        workspace: WorkspaceManager,
        config: ConfigStore,
    }

    fn fixture(config: AderynConfig) -> Fixture {
        let (connection, client) = Connection::memory();
        let (scan_tx, scan_rx) = mpsc::channel();
        let workspace = WorkspaceManager::new(&InitializeParams::default());
        let store = DiagnosticsStore::new();
        let config = ConfigStore::new(config);

        let server = AderynLspServer::new(
            workspace.clone(),
            store.clone(),
            config.clone(),
            RunStats::new(),
            scan_tx,
        );

        Fixture {
            server,
            connection,
            client,
            scan_rx,
            store,
            workspace,
            config,
        }
    }

    fn test_uri(name: &str) -> Url {
        #[cfg(windows)]
        let path = format!("C:\\p\\{}", name);
        #[cfg(not(windows))]
        let path = format!("/p/{}", name);
        Url::from_file_path(path).unwrap()
    }

    fn open(fx: &Fixture, name: &str, language_id: &str) -> Url {
        let uri = test_uri(name);
        fx.workspace.add_document(TextDocumentItem {
            uri: uri.clone(),
            language_id: language_id.to_string(),
            version: 1,
            text: String::new(),
        });
        uri
    }

    fn seed_diagnostic(fx: &Fixture, name: &str, line: u32) {
        let uri = open(fx, name, "solidity");
        let record = DiagnosticRecord {
            path: uri.to_file_path().unwrap(),
            line,
            end_line: line,
            column: 0,
            end_column: END_OF_LINE,
            severity: Severity::Error,
            message: "Reentrancy: desc [reentrancy]".to_string(),
            metadata: RecordMetadata {
                severity_label: "high".to_string(),
                detector_name: "reentrancy".to_string(),
                title: "Reentrancy".to_string(),
                description: "desc".to_string(),
                hint: None,
                src_char: None,
            },
        };
        let diagnostic = DiagnosticsMapper::new().record_to_diagnostic(&record);

        let mut by_file = HashMap::new();
        by_file.insert(record.path, vec![diagnostic]);
        fx.store
            .publish(
                &fx.connection.sender,
                &fx.workspace,
                &["sol".to_string()],
                by_file,
                || true,
            )
            .unwrap();
        drain(fx);
    }

    fn command(id: i32, name: &str, arguments: Vec<serde_json::Value>) -> Request {
        Request::new(
            RequestId::from(id),
            ExecuteCommand::METHOD.to_string(),
            json!({ "command": name, "arguments": arguments }),
        )
    }

    fn notification(method: &str, params: serde_json::Value) -> Notification {
        Notification::new(method.to_string(), params)
    }

    fn drain(fx: &Fixture) -> Vec<Message> {
        fx.client.receiver.try_iter().collect()
    }

    fn response(messages: &[Message]) -> &Response {
        messages
            .iter()
            .find_map(|m| match m {
                Message::Response(r) => Some(r),
                _ => None,
            })
            .expect("no response sent")
    }

    fn count(messages: &[Message], method: &str) -> usize {
        messages
            .iter()
            .filter(|m| matches!(m, Message::Notification(n) if n.method == method))
            .count()
    }

    #[test]
    fn test_capabilities_advertise_commands_and_hover() {
        let caps = server_capabilities();
        let commands = caps.execute_command_provider.unwrap().commands;
        assert_eq!(commands.len(), 5);
        assert!(commands.contains(&"aderyn.toggle".to_string()));
        assert!(caps.hover_provider.is_some());
    }

    #[test]
    fn test_toggle_disable_clears_then_enable_runs() {
        let fx = fixture(AderynConfig::default());
        seed_diagnostic(&fx, "A.sol", 3);

        fx.server
            .process_request(&fx.connection, command(1, commands::TOGGLE, vec![]));
        let messages = drain(&fx);
        assert_eq!(response(&messages).result, Some(json!({ "enabled": false })));
        assert_eq!(count(&messages, PublishDiagnostics::METHOD), 1);
        assert!(fx.store.published_uris().is_empty());
        assert!(!fx.config.is_enabled());
        assert!(fx.scan_rx.try_recv().is_err());

        fx.server
            .process_request(&fx.connection, command(2, commands::TOGGLE, vec![]));
        let messages = drain(&fx);
        assert_eq!(response(&messages).result, Some(json!({ "enabled": true })));
        assert!(matches!(
            fx.scan_rx.try_recv(),
            Ok(ScanRequest::Run(RunRequest { trigger: RunTrigger::Toggle, .. }))
        ));
    }

    #[test]
    fn test_run_command_answers_with_worker_outcome() {
        let fx = fixture(AderynConfig::default());
        fx.server.process_request(
            &fx.connection,
            command(7, commands::RUN, vec![json!("/p/src/A.sol")]),
        );

        let request = match fx.scan_rx.try_recv().unwrap() {
            ScanRequest::Run(request) => request,
            other => panic!("unexpected request: {:?}", other),
        };
        assert_eq!(request.trigger, RunTrigger::Command);
        assert_eq!(request.start_path, Some(PathBuf::from("/p/src/A.sol")));

        request
            .response_tx
            .unwrap()
            .send(crate::scan::RunOutcome::Skipped {
                reason: "analysis is disabled".to_string(),
            })
            .unwrap();

        match fx.client.receiver.recv_timeout(Duration::from_secs(5)).unwrap() {
            Message::Response(response) => {
                assert_eq!(response.id, RequestId::from(7));
                assert_eq!(response.result.unwrap()["status"], "skipped");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_show_details_found() {
        let fx = fixture(AderynConfig::default());
        seed_diagnostic(&fx, "A.sol", 9);

        fx.server.process_request(
            &fx.connection,
            command(3, commands::SHOW_DETAILS, vec![json!(test_uri("A.sol")), json!(9)]),
        );
        let messages = drain(&fx);
        let result = response(&messages).result.clone().unwrap();
        assert_eq!(result["found"], true);
        assert!(result["contents"].as_str().unwrap().contains("Reentrancy"));
        assert_eq!(count(&messages, ShowMessage::METHOD), 0);
    }

    #[test]
    fn test_show_details_nothing_found_notifies() {
        let fx = fixture(AderynConfig::default());
        seed_diagnostic(&fx, "A.sol", 9);

        fx.server.process_request(
            &fx.connection,
            command(
                4,
                commands::SHOW_DETAILS,
                vec![json!({ "uri": test_uri("A.sol"), "line": 2 })],
            ),
        );
        let messages = drain(&fx);
        assert_eq!(response(&messages).result.clone().unwrap()["found"], false);
        assert_eq!(count(&messages, ShowMessage::METHOD), 1);
    }

    #[test]
    fn test_hover_returns_panel_or_null() {
        let fx = fixture(AderynConfig::default());
        seed_diagnostic(&fx, "A.sol", 9);

        let hover = |id: i32, line: u32| {
            Request::new(
                RequestId::from(id),
                HoverRequest::METHOD.to_string(),
                json!({
                    "textDocument": { "uri": test_uri("A.sol") },
                    "position": { "line": line, "character": 4 }
                }),
            )
        };

        fx.server.process_request(&fx.connection, hover(5, 9));
        let messages = drain(&fx);
        let result = response(&messages).result.clone().unwrap();
        assert_eq!(result["contents"]["kind"], "markdown");
        assert!(result["contents"]["value"]
            .as_str()
            .unwrap()
            .contains("`reentrancy`"));

        fx.server.process_request(&fx.connection, hover(6, 0));
        let messages = drain(&fx);
        assert_eq!(response(&messages).result, Some(serde_json::Value::Null));
        assert_eq!(count(&messages, ShowMessage::METHOD), 0);
    }

    #[test]
    fn test_set_min_severity() {
        let fx = fixture(AderynConfig::default());

        fx.server.process_request(
            &fx.connection,
            command(8, commands::SET_MIN_SEVERITY, vec![json!("warn")]),
        );
        let messages = drain(&fx);
        assert_eq!(
            response(&messages).result,
            Some(json!({ "min_severity": "warn" }))
        );
        assert_eq!(fx.config.snapshot().min_severity, Severity::Warn);
        assert!(matches!(
            fx.scan_rx.try_recv(),
            Ok(ScanRequest::Run(RunRequest { trigger: RunTrigger::SeverityChanged, .. }))
        ));
    }

    #[test]
    fn test_set_min_severity_rejects_unknown_level() {
        let fx = fixture(AderynConfig::default());

        fx.server.process_request(
            &fx.connection,
            command(9, commands::SET_MIN_SEVERITY, vec![json!("critical")]),
        );
        let messages = drain(&fx);
        let error = response(&messages).error.clone().unwrap();
        assert_eq!(error.code, error_codes::INVALID_PARAMS);
        assert_eq!(count(&messages, ShowMessage::METHOD), 1);
        assert_eq!(fx.config.snapshot().min_severity, Severity::Hint);
        assert!(fx.scan_rx.try_recv().is_err());
    }

    #[test]
    fn test_show_config_logs_and_responds() {
        let fx = fixture(AderynConfig::default());

        fx.server
            .process_request(&fx.connection, command(10, commands::SHOW_CONFIG, vec![]));
        let messages = drain(&fx);
        let result = response(&messages).result.clone().unwrap();
        assert_eq!(result["config"]["command"], "aderyn");
        assert_eq!(result["stats"]["total_runs"], 0);
        assert_eq!(count(&messages, "window/logMessage"), 1);
    }

    #[test]
    fn test_unknown_command_and_method() {
        let fx = fixture(AderynConfig::default());

        fx.server
            .process_request(&fx.connection, command(11, "aderyn.nope", vec![]));
        let messages = drain(&fx);
        assert_eq!(
            response(&messages).error.clone().unwrap().code,
            error_codes::INVALID_PARAMS
        );

        fx.server.process_request(
            &fx.connection,
            Request::new(RequestId::from(12), "aderyn/unknown".to_string(), json!({})),
        );
        let messages = drain(&fx);
        assert_eq!(
            response(&messages).error.clone().unwrap().code,
            error_codes::METHOD_NOT_FOUND
        );
    }

    #[test]
    fn test_save_triggers_run_only_for_watched_files() {
        let fx = fixture(AderynConfig::default());
        let sol = open(&fx, "A.sol", "solidity");
        let md = open(&fx, "README.md", "markdown");

        fx.server.process_notification(
            &fx.connection,
            notification(DidSaveTextDocument::METHOD, json!({ "textDocument": { "uri": md } })),
        );
        assert!(fx.scan_rx.try_recv().is_err());

        fx.server.process_notification(
            &fx.connection,
            notification(DidSaveTextDocument::METHOD, json!({ "textDocument": { "uri": sol } })),
        );
        match fx.scan_rx.try_recv().unwrap() {
            ScanRequest::Run(request) => {
                assert_eq!(request.trigger, RunTrigger::Save);
                assert_eq!(request.start_path, sol.to_file_path().ok());
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_save_ignored_when_disabled_or_run_on_save_off() {
        let mut config = AderynConfig::default();
        config.run_on_save = false;
        let fx = fixture(config);
        let sol = open(&fx, "A.sol", "solidity");

        fx.server.process_notification(
            &fx.connection,
            notification(DidSaveTextDocument::METHOD, json!({ "textDocument": { "uri": sol } })),
        );
        assert!(fx.scan_rx.try_recv().is_err());
    }

    #[test]
    fn test_initialized_runs_on_start() {
        let fx = fixture(AderynConfig::default());
        fx.server
            .process_notification(&fx.connection, notification(Initialized::METHOD, json!({})));
        assert!(matches!(
            fx.scan_rx.try_recv(),
            Ok(ScanRequest::Run(RunRequest { trigger: RunTrigger::Startup, .. }))
        ));

        let mut config = AderynConfig::default();
        config.run_on_start = false;
        let fx = fixture(config);
        fx.server
            .process_notification(&fx.connection, notification(Initialized::METHOD, json!({})));
        assert!(fx.scan_rx.try_recv().is_err());
    }

    #[test]
    fn test_document_tracking() {
        let fx = fixture(AderynConfig::default());
        let uri = test_uri("A.sol");

        fx.server.process_notification(
            &fx.connection,
            notification(
                DidOpenTextDocument::METHOD,
                json!({ "textDocument": {
                    "uri": uri, "languageId": "solidity", "version": 1, "text": "a"
                }}),
            ),
        );
        assert!(fx.workspace.is_document_open(&uri));

        fx.server.process_notification(
            &fx.connection,
            notification(
                DidChangeTextDocument::METHOD,
                json!({
                    "textDocument": { "uri": uri, "version": 2 },
                    "contentChanges": [{ "text": "b" }, { "text": "c" }]
                }),
            ),
        );
        assert_eq!(fx.workspace.get_document(&uri).unwrap().version, 2);

        fx.server.process_notification(
            &fx.connection,
            notification(DidCloseTextDocument::METHOD, json!({ "textDocument": { "uri": uri } })),
        );
        assert!(!fx.workspace.is_document_open(&uri));
    }

    #[test]
    fn test_did_change_configuration() {
        let fx = fixture(AderynConfig::default());

        fx.server.process_notification(
            &fx.connection,
            notification(
                DidChangeConfiguration::METHOD,
                json!({ "settings": { "aderyn": { "min_severity": "error", "extra_args": ["--skip-build"] } } }),
            ),
        );
        let config = fx.config.snapshot();
        assert_eq!(config.min_severity, Severity::Error);
        assert_eq!(config.extra_args, vec!["--skip-build".to_string()]);
        assert!(drain(&fx).is_empty());
        assert!(matches!(
            fx.scan_rx.try_recv(),
            Ok(ScanRequest::Run(RunRequest { trigger: RunTrigger::SettingsChanged, .. }))
        ));

        fx.server.process_notification(
            &fx.connection,
            notification(
                DidChangeConfiguration::METHOD,
                json!({ "settings": { "aderyn": { "extra_args": [] }, "solidity": { "x": 1 } } }),
            ),
        );
        assert!(fx.config.snapshot().extra_args.is_empty());
        assert!(fx.scan_rx.try_recv().is_err());

        fx.server.process_notification(
            &fx.connection,
            notification(
                DidChangeConfiguration::METHOD,
                json!({ "settings": { "timeout_seconds": 0 } }),
            ),
        );
        assert_eq!(fx.config.snapshot().timeout_seconds, 300);
        assert_eq!(count(&drain(&fx), ShowMessage::METHOD), 1);
    }

    #[test]
    fn test_settings_disable_clears_and_enable_runs() {
        let fx = fixture(AderynConfig::default());
        seed_diagnostic(&fx, "A.sol", 3);

        fx.server.process_notification(
            &fx.connection,
            notification(
                DidChangeConfiguration::METHOD,
                json!({ "settings": { "aderyn": { "enabled": false } } }),
            ),
        );
        assert_eq!(count(&drain(&fx), PublishDiagnostics::METHOD), 1);
        assert!(fx.store.published_uris().is_empty());
        assert!(fx.scan_rx.try_recv().is_err());

        fx.server.process_notification(
            &fx.connection,
            notification(
                DidChangeConfiguration::METHOD,
                json!({ "settings": { "aderyn": { "enabled": true } } }),
            ),
        );
        assert!(matches!(
            fx.scan_rx.try_recv(),
            Ok(ScanRequest::Run(RunRequest { trigger: RunTrigger::SettingsChanged, .. }))
        ));
    }

    #[test]
    fn test_workspace_folder_change_moves_root() {
        let fx = fixture(AderynConfig::default());
        let folder = Url::from_directory_path(std::env::temp_dir()).unwrap();

        fx.server.process_notification(
            &fx.connection,
            notification(
                DidChangeWorkspaceFolders::METHOD,
                json!({ "event": {
                    "added": [{ "uri": folder, "name": "tmp" }],
                    "removed": []
                }}),
            ),
        );
        assert_eq!(fx.workspace.get_workspace_root(), folder.to_file_path().ok());
    }

    #[test]
    fn test_initial_config() {
        let (connection, client) = Connection::memory();

        let config = initial_config(&connection.sender, None).unwrap();
        assert_eq!(config, AderynConfig::default());

        let config = initial_config(
            &connection.sender,
            Some(json!({ "aderyn": { "min_severity": "warn" } })),
        )
        .unwrap();
        assert_eq!(config.min_severity, Severity::Warn);
        assert!(client.receiver.try_recv().is_err());

        let config =
            initial_config(&connection.sender, Some(json!({ "timeout_seconds": 0 }))).unwrap();
        assert_eq!(config, AderynConfig::default());
        let messages: Vec<Message> = client.receiver.try_iter().collect();
        assert_eq!(count(&messages, ShowMessage::METHOD), 1);
    }

    #[test]
    fn test_extract_position_forms() {
        let uri = test_uri("A.sol");

        let (u, line) =
            AderynLspServer::extract_position(&[json!(uri.as_str()), json!(4)]).unwrap();
        assert_eq!((u, line), (uri.clone(), 4));

        let (_, line) = AderynLspServer::extract_position(&[json!({
            "textDocument": { "uri": uri.as_str() },
            "position": { "line": 6, "character": 0 }
        })])
        .unwrap();
        assert_eq!(line, 6);

        let error = AderynLspServer::extract_position(&[]).unwrap_err();
        assert!(error.downcast_ref::<InvalidParams>().is_some());
        assert!(AderynLspServer::extract_position(&[json!(uri.as_str()), json!(-1)]).is_err());
    }
}
