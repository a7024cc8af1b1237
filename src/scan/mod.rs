//! Run orchestration
//!
//! A single worker thread owns its own tokio runtime and executes analyzer
//! runs one at a time. Requests that arrive while a run is in flight wait in
//! the channel; the next time the worker looks, it drains all of them and
//! performs one run on their behalf, so at most one follow-up run is ever
//! queued. Publishing happens only here, which keeps diagnostic state free of
//! races between runs.
//!
//! The enabled flag is checked before the analyzer starts and again, under the
//! store's update lock, before publishing. The shutdown token aborts an in-flight run; dropping the child
//! kills the analyzer.

pub mod errors;
pub mod messages;
pub mod stats;

pub use errors::{AnalysisError, AnalysisResult};
pub use messages::{RunOutcome, RunRequest, RunSummary, RunTrigger, ScanRequest};
pub use stats::{RunStats, StatsSnapshot};

use crate::{
    config::{AderynConfig, ConfigStore},
    diagnostics::DiagnosticsMapper,
    diagnostics_store::DiagnosticsStore,
    notify,
    proto::RunCompletedNotification,
    report::{MappedDiagnostics, ReportFile, ReportMapper},
    runner::{resolve_root, AnalyzerRunner, Invocation},
    workspace::WorkspaceManager,
};
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use lsp_server::Message;
use lsp_types::MessageType;
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc,
    },
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared session state the worker needs.
pub struct ScanContext {
    pub config: ConfigStore,
    pub workspace: WorkspaceManager,
    pub store: DiagnosticsStore,
    pub sender: Sender<Message>,
    pub stats: RunStats,
    pub shutdown: CancellationToken,
}

pub struct ScanManager {
    runner: AnalyzerRunner,
    mapper: DiagnosticsMapper,
    ctx: ScanContext,
    run_epoch: AtomicU64,
}

impl ScanManager {
    pub fn new(ctx: ScanContext) -> Self {
        Self {
            runner: AnalyzerRunner::new(),
            mapper: DiagnosticsMapper::new(),
            ctx,
            run_epoch: AtomicU64::new(0),
        }
    }

    pub fn run(self, request_rx: mpsc::Receiver<ScanRequest>) {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                error!("Failed to create tokio runtime for the run worker: {}", e);
                return;
            }
        };

        let command = self.ctx.config.snapshot().command;
        if self.runner.is_available(&command) {
            info!("Analyzer '{}' is available", command);
        } else {
            warn!("Analyzer '{}' is not on the search path; runs will fail", command);
        }

        loop {
            let first = match request_rx.recv() {
                Ok(ScanRequest::Run(request)) => request,
                Ok(ScanRequest::Shutdown) => {
                    info!("Shutdown requested");
                    break;
                }
                Err(_) => {
                    info!("Request channel disconnected, shutting down");
                    break;
                }
            };

            let (batch, shutdown_requested) = Self::coalesce(first, &request_rx);

            if shutdown_requested {
                info!("Shutdown requested with {} runs pending", batch.len());
                Self::respond(
                    batch,
                    RunOutcome::Skipped {
                        reason: "server is shutting down".to_string(),
                    },
                );
                break;
            }

            if batch.len() > 1 {
                debug!("Coalesced {} queued run requests into one run", batch.len());
                self.ctx.stats.requests_coalesced(batch.len() as u64 - 1);
            }

            let triggers: Vec<RunTrigger> = batch.iter().map(|r| r.trigger).collect();
            debug!("Starting run for {:?}", triggers);

            let start_path = batch.iter().rev().find_map(|r| r.start_path.clone());
            let outcome = rt.block_on(self.execute(start_path));
            Self::respond(batch, outcome);
        }

        info!("ScanManager shutdown complete");
    }

    /// Takes `first` plus every run request already waiting. The flag is set
    /// when a shutdown was queued behind them.
    fn coalesce(
        first: RunRequest,
        request_rx: &mpsc::Receiver<ScanRequest>,
    ) -> (Vec<RunRequest>, bool) {
        let mut batch = vec![first];
        while let Ok(next) = request_rx.try_recv() {
            match next {
                ScanRequest::Run(request) => batch.push(request),
                ScanRequest::Shutdown => return (batch, true),
            }
        }
        (batch, false)
    }

    fn respond(batch: Vec<RunRequest>, outcome: RunOutcome) {
        for request in batch {
            if let Some(response_tx) = request.response_tx {
                let _ = response_tx.send(outcome.clone());
            }
        }
    }

    async fn execute(&self, start_path: Option<PathBuf>) -> RunOutcome {
        let config = self.ctx.config.snapshot();
        if !config.enabled {
            debug!("Analysis is disabled, skipping run");
            self.ctx.stats.run_skipped();
            return RunOutcome::Skipped {
                reason: "analysis is disabled".to_string(),
            };
        }

        let workspace_root = self.ctx.workspace.get_workspace_root();
        let root = resolve_root(&config, start_path.as_deref().or(workspace_root.as_deref()));

        let started_at = Utc::now();
        let start = Instant::now();
        self.ctx.stats.run_started();

        let result = tokio::select! {
            result = self.analyze(&config, &root) => result,
            _ = self.ctx.shutdown.cancelled() => Err(AnalysisError::Cancelled),
        };

        match result {
            Ok(mapped) => self.publish(&config, &root, mapped, started_at, start.elapsed()),
            Err(e) => self.fail(e),
        }
    }

    async fn analyze(&self, config: &AderynConfig, root: &Path) -> AnalysisResult<MappedDiagnostics> {
        let invocation = Invocation::new(config, root);
        let report_file = ReportFile::new(invocation.report_path.clone());

        let status = self.runner.run(&invocation, config.get_run_timeout()).await?;
        debug!("Analyzer exit code: {:?}", status.exit_code);

        let report = report_file.load()?;
        Ok(ReportMapper::new(config, root).map(&report))
    }

    fn publish(
        &self,
        config: &AderynConfig,
        root: &Path,
        mapped: MappedDiagnostics,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> RunOutcome {
        let diagnostics = self.mapper.map_records(&mapped);
        let diagnostic_stats = DiagnosticsMapper::get_diagnostic_stats(&diagnostics);

        let summary = match self.ctx.store.publish(
            &self.ctx.sender,
            &self.ctx.workspace,
            &config.filetypes,
            diagnostics,
            || self.ctx.config.is_enabled(),
        ) {
            Ok(Some(summary)) => summary,
            Ok(None) => {
                info!("Analysis was disabled during the run, discarding results");
                self.ctx.stats.run_completed(duration);
                return RunOutcome::Skipped {
                    reason: "analysis was disabled during the run".to_string(),
                };
            }
            Err(e) => {
                let message = format!("Failed to publish diagnostics: {}", e);
                error!("{}", message);
                self.ctx.stats.run_failed(message.clone());
                return RunOutcome::Failed { message };
            }
        };

        let run_epoch = self.run_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let duration_ms = duration.as_millis() as u64;

        info!(
            "Run {} found {} diagnostics in {} files (highest {:?}), published {} to {} open documents in {}ms",
            run_epoch,
            diagnostic_stats.total_count,
            diagnostic_stats.file_count,
            diagnostic_stats.highest_severity(),
            summary.published,
            summary.files.len(),
            duration_ms
        );

        let notification = RunCompletedNotification {
            files: summary.files.iter().map(|uri| uri.to_string()).collect(),
            run_epoch,
            count: summary.published,
            root: root.display().to_string(),
            started_at: started_at.to_rfc3339(),
            duration_ms,
        };
        if let Err(e) = notify::run_completed(&self.ctx.sender, &notification) {
            warn!("Failed to send run completion notification: {}", e);
        }

        self.ctx.stats.run_completed(duration);

        RunOutcome::Published(RunSummary {
            run_epoch,
            root: root.display().to_string(),
            files: summary.files.len(),
            diagnostics: summary.published,
            skipped_files: summary.skipped_files,
            duration_ms,
        })
    }

    fn fail(&self, error: AnalysisError) -> RunOutcome {
        let message = error.to_string();
        self.ctx.stats.run_failed(message.clone());

        if error.is_user_visible() {
            error!("Run failed: {}", message);
            if let Err(e) = notify::show_message(
                &self.ctx.sender,
                MessageType::ERROR,
                format!("Aderyn: {}", message),
            ) {
                warn!("Failed to notify client: {}", e);
            }
        } else {
            info!("Run cancelled");
        }

        RunOutcome::Failed { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;
    use lsp_types::{
        notification::{Notification as _, PublishDiagnostics, ShowMessage},
        InitializeParams, PublishDiagnosticsParams, TextDocumentItem, Url,
    };
    use std::thread;

    struct Harness {
        scan_tx: mpsc::Sender<ScanRequest>,
        client_rx: Receiver<Message>,
        worker: thread::JoinHandle<()>,
        config: ConfigStore,
    }

    impl Harness {
        fn start(config: AderynConfig, workspace: WorkspaceManager) -> Self {
            let (sender, client_rx) = crossbeam_channel::unbounded();
            let config = ConfigStore::new(config);
            let manager = ScanManager::new(ScanContext {
                config: config.clone(),
                workspace,
                store: DiagnosticsStore::new(),
                sender,
                stats: RunStats::new(),
                shutdown: CancellationToken::new(),
            });

            let (scan_tx, scan_rx) = mpsc::channel();
            let worker = thread::spawn(move || manager.run(scan_rx));

            Self {
                scan_tx,
                client_rx,
                worker,
                config,
            }
        }

        fn run(&self) -> RunOutcome {
            let (tx, rx) = mpsc::channel();
            self.scan_tx
                .send(ScanRequest::Run(
                    RunRequest::new(RunTrigger::Command).with_response(tx),
                ))
                .unwrap();
            rx.recv_timeout(Duration::from_secs(60)).unwrap()
        }

        fn stop(self) -> Vec<Message> {
            self.scan_tx.send(ScanRequest::Shutdown).unwrap();
            self.worker.join().unwrap();
            self.client_rx.try_iter().collect()
        }
    }

    fn notifications<'a>(messages: &'a [Message], method: &str) -> Vec<&'a lsp_server::Notification> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::Notification(n) if n.method == method => Some(n),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_disabled_run_is_skipped() {
        let mut config = AderynConfig::default();
        config.enabled = false;

        let harness = Harness::start(config, WorkspaceManager::new(&InitializeParams::default()));
        assert!(matches!(harness.run(), RunOutcome::Skipped { .. }));
        assert!(harness.stop().is_empty());
    }

    #[test]
    fn test_missing_analyzer_sends_one_notice() {
        let mut config = AderynConfig::default();
        config.command = "aderyn-lsp-test-missing-binary".to_string();
        config.root = Some(std::env::temp_dir());

        let harness = Harness::start(config, WorkspaceManager::new(&InitializeParams::default()));
        assert!(matches!(harness.run(), RunOutcome::Failed { .. }));
        assert!(harness.config.is_enabled());

        let messages = harness.stop();
        assert_eq!(notifications(&messages, ShowMessage::METHOD).len(), 1);
        assert!(notifications(&messages, PublishDiagnostics::METHOD).is_empty());
    }

    #[test]
    fn test_coalesce_drains_queued_runs() {
        let (tx, rx) = mpsc::channel();
        tx.send(ScanRequest::Run(RunRequest::new(RunTrigger::Save)))
            .unwrap();
        tx.send(ScanRequest::Run(RunRequest::new(RunTrigger::Command)))
            .unwrap();

        let (batch, shutdown) = ScanManager::coalesce(RunRequest::new(RunTrigger::Startup), &rx);
        assert_eq!(batch.len(), 3);
        assert!(!shutdown);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_coalesce_stops_at_shutdown() {
        let (tx, rx) = mpsc::channel();
        tx.send(ScanRequest::Shutdown).unwrap();
        tx.send(ScanRequest::Run(RunRequest::new(RunTrigger::Save)))
            .unwrap();

        let (batch, shutdown) = ScanManager::coalesce(RunRequest::new(RunTrigger::Toggle), &rx);
        assert_eq!(batch.len(), 1);
        assert!(shutdown);
    }

    #[test]
    fn test_coalesced_requests_share_one_outcome() {
        let (first_tx, first_rx) = mpsc::channel();
        let (second_tx, second_rx) = mpsc::channel();

        let batch = vec![
            RunRequest::new(RunTrigger::Save).with_response(first_tx),
            RunRequest::new(RunTrigger::Command),
            RunRequest::new(RunTrigger::Command).with_response(second_tx),
        ];

        let outcome = RunOutcome::Skipped {
            reason: "analysis is disabled".to_string(),
        };
        ScanManager::respond(batch, outcome.clone());

        assert_eq!(first_rx.recv().unwrap(), outcome);
        assert_eq!(second_rx.recv().unwrap(), outcome);
    }

    #[cfg(unix)]
    mod stub_analyzer {
        use super::*;
        use std::{fs, os::unix::fs::PermissionsExt};
        use tempfile::TempDir;

        /// Writes an executable script that copies `report` to the path given
        /// after `--output`.
        fn write_stub(dir: &Path, report: &str) -> PathBuf {
            let script = dir.join("fake-aderyn");
            let body = format!(
                "#!/bin/sh\nout=\"\"\nwhile [ \"$#\" -gt 0 ]; do\n  if [ \"$1\" = \"--output\" ]; then shift; out=\"$1\"; fi\n  shift\ndone\ncat > \"$out\" <<'EOF'\n{}\nEOF\n",
                report
            );
            fs::write(&script, body).unwrap();
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
            script
        }

        fn open_document(workspace: &WorkspaceManager, path: &Path) -> Url {
            let uri = Url::from_file_path(path).unwrap();
            workspace.add_document(TextDocumentItem {
                uri: uri.clone(),
                language_id: "solidity".to_string(),
                version: 1,
                text: String::new(),
            });
            uri
        }

        fn project() -> (TempDir, AderynConfig) {
            let temp = TempDir::new().unwrap();
            let project = temp.path().join("project");
            fs::create_dir_all(project.join("src")).unwrap();
            fs::write(project.join("foundry.toml"), "").unwrap();

            let mut config = AderynConfig::default();
            config.root = Some(project);
            (temp, config)
        }

        #[test]
        fn test_run_publishes_reentrancy_finding() {
            let (temp, mut config) = project();
            let root = config.root.clone().unwrap();
            let script = write_stub(
                temp.path(),
                r#"{"high_issues":{"issues":[{"title":"Reentrancy","description":"desc","detector_name":"reentrancy","instances":[{"contract_path":"src/A.sol","line_no":10}]}]},"low_issues":{"issues":[]}}"#,
            );
            config.command = script.to_string_lossy().into_owned();

            let workspace = WorkspaceManager::new(&InitializeParams::default());
            let a = open_document(&workspace, &root.join("src/A.sol"));
            let b = open_document(&workspace, &root.join("src/B.sol"));

            let harness = Harness::start(config, workspace);
            match harness.run() {
                RunOutcome::Published(summary) => {
                    assert_eq!(summary.diagnostics, 1);
                    assert_eq!(summary.files, 1);
                    assert_eq!(summary.run_epoch, 1);
                }
                other => panic!("unexpected outcome: {:?}", other),
            }

            let messages = harness.stop();
            let published: Vec<PublishDiagnosticsParams> =
                notifications(&messages, PublishDiagnostics::METHOD)
                    .into_iter()
                    .map(|n| serde_json::from_value(n.params.clone()).unwrap())
                    .collect();

            let for_a = published.iter().find(|p| p.uri == a).unwrap();
            assert_eq!(for_a.diagnostics.len(), 1);
            assert_eq!(for_a.diagnostics[0].range.start.line, 9);
            assert!(for_a.diagnostics[0].message.contains("Reentrancy"));
            assert!(published.iter().find(|p| p.uri == b).unwrap().diagnostics.is_empty());

            let completed = notifications(&messages, "aderyn/runCompleted");
            assert_eq!(completed.len(), 1);
            assert_eq!(completed[0].params["count"], 1);
        }

        #[test]
        fn test_invalid_report_sends_notice_and_publishes_nothing() {
            let (temp, mut config) = project();
            let root = config.root.clone().unwrap();
            let script = write_stub(temp.path(), "this is not json");
            config.command = script.to_string_lossy().into_owned();

            let workspace = WorkspaceManager::new(&InitializeParams::default());
            open_document(&workspace, &root.join("src/A.sol"));

            let harness = Harness::start(config, workspace);
            assert!(matches!(harness.run(), RunOutcome::Failed { .. }));

            let messages = harness.stop();
            assert_eq!(notifications(&messages, ShowMessage::METHOD).len(), 1);
            assert!(notifications(&messages, PublishDiagnostics::METHOD).is_empty());
        }
    }
}
