//! Analysis errors
//!
//! Uses thiserror so the worker can tell environment failures (no analyzer,
//! cannot start it) from report failures (unreadable, malformed) and decide
//! what to show the user. Malformed individual instances are not errors; the
//! mapper drops them.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("'{tool}' was not found on the search path; install it or set `command`")]
    ToolNotFound { tool: String },

    #[error("Failed to run '{tool}': {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{tool}' timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("Failed to read report {}: {source}", path.display())]
    ReportRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Report {} is not valid JSON output: {source}", path.display())]
    ReportDecode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Run was cancelled")]
    Cancelled,
}

impl AnalysisError {
    /// Errors the user should hear about. Cancellation only happens on shutdown.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

pub type AnalysisResult<T> = std::result::Result<T, AnalysisError>;
