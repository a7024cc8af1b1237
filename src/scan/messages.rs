//! Run messages
//!
//! Typed requests for the run worker and the outcome it reports back.

use serde::Serialize;
use std::{path::PathBuf, sync::mpsc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Startup,
    Save,
    Command,
    Toggle,
    SeverityChanged,
    SettingsChanged,
}

#[derive(Debug)]
pub struct RunRequest {
    pub trigger: RunTrigger,

    /// Where root discovery starts, usually the triggering document.
    pub start_path: Option<PathBuf>,

    pub response_tx: Option<mpsc::Sender<RunOutcome>>,
}

impl RunRequest {
    pub fn new(trigger: RunTrigger) -> Self {
        Self {
            trigger,
            start_path: None,
            response_tx: None,
        }
    }

    pub fn with_start_path(mut self, start_path: Option<PathBuf>) -> Self {
        self.start_path = start_path;
        self
    }

    pub fn with_response(mut self, response_tx: mpsc::Sender<RunOutcome>) -> Self {
        self.response_tx = Some(response_tx);
        self
    }
}

#[derive(Debug)]
pub enum ScanRequest {
    Run(RunRequest),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_epoch: u64,
    pub root: String,
    pub files: usize,
    pub diagnostics: usize,
    pub skipped_files: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Published(RunSummary),
    Skipped { reason: String },
    Failed { message: String },
}
