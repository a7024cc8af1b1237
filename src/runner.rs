//! Analyzer invocation
//!
//! Builds the command line for the external analyzer and runs it as a child
//! process. The analyzer writes its findings to a report file instead of
//! stdout, so every run gets its own uniquely named report path; two runs can
//! never read each other's output.
//!
//! The child's exit status is logged but not interpreted. Aderyn exits non-zero
//! when it finds issues, and a run that produced no report is caught when the
//! report is loaded.

use crate::{
    config::AderynConfig,
    scan::errors::{AnalysisError, AnalysisResult},
};
use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fixed flag the analyzer uses for its report destination.
const OUTPUT_FLAG: &str = "--output";

/// How much analyzer stderr ends up in the log when it exits unsuccessfully.
const STDERR_LOG_LIMIT: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,

    pub args: Vec<OsString>,

    /// Working directory of the child; also the analysis target.
    pub cwd: PathBuf,

    pub report_path: PathBuf,
}

impl Invocation {
    pub fn new(config: &AderynConfig, root: &Path) -> Self {
        Self::with_report_path(config, root, unique_report_path())
    }

    pub fn with_report_path(config: &AderynConfig, root: &Path, report_path: PathBuf) -> Self {
        let mut args: Vec<OsString> = Vec::with_capacity(config.extra_args.len() + 3);
        args.push(OUTPUT_FLAG.into());
        args.push(report_path.clone().into_os_string());
        args.extend(config.extra_args.iter().map(OsString::from));
        args.push(root.as_os_str().to_os_string());

        Self {
            program: config.command.clone(),
            args,
            cwd: root.to_path_buf(),
            report_path,
        }
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Report location for a single run, in the system temp directory.
pub fn unique_report_path() -> PathBuf {
    env::temp_dir().join(format!("aderyn-lsp-{}.json", Uuid::new_v4()))
}

/// Determines the analysis root: the configured `root`, else the nearest
/// ancestor of `start` holding a project marker, else the process directory.
pub fn resolve_root(config: &AderynConfig, start: Option<&Path>) -> PathBuf {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    if let Some(root) = &config.root {
        return if root.is_absolute() {
            root.clone()
        } else {
            cwd.join(root)
        };
    }

    let start = start.map(Path::to_path_buf).unwrap_or_else(|| cwd.clone());
    match find_marker_root(&start, &config.root_markers) {
        Some(root) => {
            debug!("Resolved analysis root {:?} from {:?}", root, start);
            root
        }
        None => {
            debug!("No project marker above {:?}, using {:?}", start, cwd);
            cwd
        }
    }
}

/// Walks up from `start` (or its parent, when `start` is a file) to the first
/// directory containing one of `markers`.
pub fn find_marker_root(start: &Path, markers: &[String]) -> Option<PathBuf> {
    let start = if start.is_file() { start.parent()? } else { start };

    start
        .ancestors()
        .find(|dir| markers.iter().any(|marker| dir.join(marker).exists()))
        .map(Path::to_path_buf)
}

#[derive(Debug, Clone)]
pub struct RunStatus {
    pub exit_code: Option<i32>,

    pub success: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AnalyzerRunner;

impl AnalyzerRunner {
    pub fn new() -> Self {
        Self
    }

    pub fn locate(&self, program: &str) -> AnalysisResult<PathBuf> {
        which::which(program).map_err(|_| AnalysisError::ToolNotFound {
            tool: program.to_string(),
        })
    }

    pub fn is_available(&self, program: &str) -> bool {
        self.locate(program).is_ok()
    }

    /// Runs the analyzer to completion. The child is killed if the timeout
    /// expires or the returned future is dropped.
    pub async fn run(&self, invocation: &Invocation, timeout: Duration) -> AnalysisResult<RunStatus> {
        let binary = self.locate(&invocation.program)?;

        info!(
            "Running analyzer in {:?}: {}",
            invocation.cwd,
            invocation.command_line()
        );

        let child = Command::new(&binary)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AnalysisError::Spawn {
                tool: invocation.program.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| AnalysisError::Spawn {
                tool: invocation.program.clone(),
                source,
            })?,
            Err(_) => {
                warn!("Analyzer exceeded {:?}, killing it", timeout);
                return Err(AnalysisError::Timeout {
                    tool: invocation.program.clone(),
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        if output.status.success() {
            debug!("Analyzer exited successfully");
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .chars()
                .rev()
                .take(STDERR_LOG_LIMIT)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            warn!(
                "Analyzer exited with {}: {}",
                output.status,
                tail.trim()
            );
        }

        Ok(RunStatus {
            exit_code: output.status.code(),
            success: output.status.success(),
        })
    }
}
