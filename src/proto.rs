//! Protocol types
//!
//! Defines the wire format of the analyzer's JSON report separately from the
//! records we publish. The analyzer's report evolves with new detectors while
//! the server needs a stable shape to map from, so decoding is typed: a report
//! missing required fields fails as a whole instead of being half-read.
//!
//! Instance-level fields stay loosely typed. A single instance with a missing
//! path or a non-numeric line must only drop itself, never its siblings.

use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr};
use thiserror::Error;

/// Diagnostic source and namespace for everything this server publishes.
pub const DIAGNOSTIC_SOURCE: &str = "aderyn";

/// Column used as the end of a whole-line span. Clients clamp it to the real
/// line length.
pub const END_OF_LINE: u32 = 9999;

/// Normalised severity levels. Smaller values are more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "SeverityInput", into = "String")]
pub enum Severity {
    Error = 1,
    Warn = 2,
    Info = 3,
    Hint = 4,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Self::Error, Self::Warn, Self::Info, Self::Hint];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Hint => "hint",
        }
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }

    pub fn from_level(level: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| u64::from(s.level()) == level)
    }

    /// True when this severity is at least as severe as `min`.
    pub fn meets(&self, min: Severity) -> bool {
        self.level() <= min.level()
    }

    pub fn to_lsp_severity(&self) -> lsp_types::DiagnosticSeverity {
        match self {
            Self::Error => lsp_types::DiagnosticSeverity::ERROR,
            Self::Warn => lsp_types::DiagnosticSeverity::WARNING,
            Self::Info => lsp_types::DiagnosticSeverity::INFORMATION,
            Self::Hint => lsp_types::DiagnosticSeverity::HINT,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown severity '{0}' (expected one of error, warn, info, hint)")]
pub struct UnknownSeverity(pub String);

impl FromStr for Severity {
    type Err = UnknownSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" | "1" => Ok(Self::Error),
            "warn" | "warning" | "2" => Ok(Self::Warn),
            "info" | "information" | "3" => Ok(Self::Info),
            "hint" | "4" => Ok(Self::Hint),
            _ => Err(UnknownSeverity(s.to_string())),
        }
    }
}

impl From<Severity> for String {
    fn from(severity: Severity) -> Self {
        severity.as_str().to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SeverityInput {
    Level(u64),
    Label(String),
}

impl TryFrom<SeverityInput> for Severity {
    type Error = UnknownSeverity;

    fn try_from(input: SeverityInput) -> Result<Self, UnknownSeverity> {
        match input {
            SeverityInput::Level(level) => {
                Severity::from_level(level).ok_or_else(|| UnknownSeverity(level.to_string()))
            }
            SeverityInput::Label(label) => label.parse(),
        }
    }
}

/// Decoded analyzer report. Keys the analyzer writes beyond the two issue
/// categories are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_issues: Option<IssueCategory>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_issues: Option<IssueCategory>,
}

impl AnalysisReport {
    /// Categories in report order, paired with their external label.
    pub fn categories(&self) -> [(&'static str, Option<&IssueCategory>); 2] {
        [
            ("high", self.high_issues.as_ref()),
            ("low", self.low_issues.as_ref()),
        ]
    }

    pub fn issue_count(&self) -> usize {
        self.categories()
            .iter()
            .filter_map(|(_, category)| *category)
            .map(|category| category.issues.len())
            .sum()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueCategory {
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub title: String,

    pub description: String,

    pub detector_name: String,

    pub instances: Vec<IssueInstance>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueInstance {
    #[serde(default)]
    pub contract_path: Option<serde_json::Value>,

    #[serde(default)]
    pub line_no: Option<serde_json::Value>,

    #[serde(default)]
    pub hint: Option<serde_json::Value>,

    #[serde(default)]
    pub src_char: Option<serde_json::Value>,
}

impl IssueInstance {
    /// Contract path as written by the analyzer, if it is a string.
    pub fn path(&self) -> Option<&str> {
        self.contract_path.as_ref().and_then(|v| v.as_str())
    }

    /// Non-blank hint text. Anything other than a string counts as no hint.
    pub fn hint(&self) -> Option<&str> {
        self.hint
            .as_ref()
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|h| !h.is_empty())
    }

    /// 1-based line, present only when the report carries a non-negative integer.
    pub fn line(&self) -> Option<u32> {
        self.line_no
            .as_ref()
            .and_then(|v| v.as_u64())
            .and_then(|n| u32::try_from(n).ok())
    }

    pub fn source_offset(&self) -> Option<String> {
        match self.src_char.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Detail carried alongside each record for the detail view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub severity_label: String,

    pub detector_name: String,

    pub title: String,

    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub src_char: Option<String>,
}

/// One mapped finding, ready to become an LSP diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub path: PathBuf,

    pub line: u32,

    pub end_line: u32,

    pub column: u32,

    pub end_column: u32,

    pub severity: Severity,

    pub message: String,

    pub metadata: RecordMetadata,
}

impl DiagnosticRecord {
    pub fn to_lsp_range(&self) -> lsp_types::Range {
        lsp_types::Range {
            start: lsp_types::Position {
                line: self.line,
                character: self.column,
            },
            end: lsp_types::Position {
                line: self.end_line,
                character: self.end_column,
            },
        }
    }
}

/// Payload of the `aderyn/runCompleted` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCompletedNotification {
    pub files: Vec<String>,

    pub run_epoch: u64,

    pub count: usize,

    pub root: String,

    pub started_at: String,

    pub duration_ms: u64,
}

pub const RUN_COMPLETED_METHOD: &str = "aderyn/runCompleted";

pub mod commands {
    pub const TOGGLE: &str = "aderyn.toggle";
    pub const RUN: &str = "aderyn.run";
    pub const SHOW_DETAILS: &str = "aderyn.showDetails";
    pub const SET_MIN_SEVERITY: &str = "aderyn.setMinSeverity";
    pub const SHOW_CONFIG: &str = "aderyn.showConfig";

    pub const ALL: [&str; 5] = [TOGGLE, RUN, SHOW_DETAILS, SET_MIN_SEVERITY, SHOW_CONFIG];
}

pub mod error_codes {
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}
