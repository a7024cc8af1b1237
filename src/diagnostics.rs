//! Diagnostic conversion
//!
//! Turns mapped report records into LSP diagnostics and renders the detail
//! panel shown for a diagnostic. The record metadata travels in the
//! diagnostic's `data` field, so the panel can be rebuilt from a published
//! diagnostic alone without keeping the report around.

use crate::{
    proto::{DiagnosticRecord, RecordMetadata, DIAGNOSTIC_SOURCE},
    report::MappedDiagnostics,
};
use lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString};
use std::{collections::HashMap, path::PathBuf};
use tracing::{debug, warn};

/// Upper bound on the rendered detail panel, in lines.
pub const MAX_DETAIL_LINES: usize = 40;

#[derive(Debug, Clone)]
pub struct DiagnosticsMapper {
    max_detail_lines: usize,
}

impl DiagnosticsMapper {
    pub fn new() -> Self {
        Self {
            max_detail_lines: MAX_DETAIL_LINES,
        }
    }

    pub fn with_max_detail_lines(max_detail_lines: usize) -> Self {
        Self {
            max_detail_lines: max_detail_lines.max(1),
        }
    }

    pub fn map_records(&self, mapped: &MappedDiagnostics) -> HashMap<PathBuf, Vec<Diagnostic>> {
        let diagnostics_by_file: HashMap<PathBuf, Vec<Diagnostic>> = mapped
            .iter()
            .map(|(path, records)| {
                let diagnostics = records.iter().map(|r| self.record_to_diagnostic(r)).collect();
                (path.clone(), diagnostics)
            })
            .collect();

        debug!(
            "Converted records to diagnostics across {} files",
            diagnostics_by_file.len()
        );
        diagnostics_by_file
    }

    pub fn record_to_diagnostic(&self, record: &DiagnosticRecord) -> Diagnostic {
        let data = match serde_json::to_value(&record.metadata) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Failed to encode diagnostic metadata: {}", e);
                None
            }
        };

        Diagnostic {
            range: record.to_lsp_range(),
            severity: Some(record.severity.to_lsp_severity()),
            code: Some(NumberOrString::String(
                record.metadata.detector_name.clone(),
            )),
            code_description: None,
            source: Some(DIAGNOSTIC_SOURCE.to_string()),
            message: record.message.clone(),
            related_information: None,
            tags: None,
            data,
        }
    }

    /// Detail panel for a diagnostic this server published. `None` when the
    /// diagnostic carries no readable metadata.
    pub fn render_details(&self, diagnostic: &Diagnostic) -> Option<String> {
        let metadata: RecordMetadata = serde_json::from_value(diagnostic.data.clone()?).ok()?;
        Some(self.render_metadata(&metadata))
    }

    pub fn render_metadata(&self, metadata: &RecordMetadata) -> String {
        let mut lines = vec![
            format!("### {}", metadata.title.trim()),
            String::new(),
            format!("**Detector:** `{}`", metadata.detector_name),
            format!("**Severity:** {}", metadata.severity_label),
            String::new(),
        ];
        lines.extend(metadata.description.trim().lines().map(str::to_string));

        if let Some(hint) = &metadata.hint {
            lines.push(String::new());
            lines.push(format!("**Hint:** {}", hint));
        }
        if let Some(src_char) = &metadata.src_char {
            lines.push(String::new());
            lines.push(format!("**Source offset:** `{}`", src_char));
        }

        if lines.len() > self.max_detail_lines {
            lines.truncate(self.max_detail_lines - 1);
            lines.push("…".to_string());
        }

        lines.join("\n")
    }

    pub fn get_diagnostic_stats(
        diagnostics_by_file: &HashMap<PathBuf, Vec<Diagnostic>>,
    ) -> DiagnosticStats {
        let mut stats = DiagnosticStats::default();

        for diagnostics in diagnostics_by_file.values() {
            stats.total_count += diagnostics.len();

            for diagnostic in diagnostics {
                match diagnostic
                    .severity
                    .unwrap_or(DiagnosticSeverity::INFORMATION)
                {
                    DiagnosticSeverity::ERROR => stats.error_count += 1,
                    DiagnosticSeverity::WARNING => stats.warning_count += 1,
                    DiagnosticSeverity::HINT => stats.hint_count += 1,
                    _ => stats.info_count += 1,
                }
            }
        }

        stats.file_count = diagnostics_by_file.len();
        stats
    }
}

impl Default for DiagnosticsMapper {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticStats {
    pub total_count: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub hint_count: usize,
    pub file_count: usize,
}

impl DiagnosticStats {
    pub fn highest_severity(&self) -> Option<DiagnosticSeverity> {
        if self.error_count > 0 {
            Some(DiagnosticSeverity::ERROR)
        } else if self.warning_count > 0 {
            Some(DiagnosticSeverity::WARNING)
        } else if self.info_count > 0 {
            Some(DiagnosticSeverity::INFORMATION)
        } else if self.hint_count > 0 {
            Some(DiagnosticSeverity::HINT)
        } else {
            None
        }
    }
}
