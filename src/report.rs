//! Report loading and mapping
//!
//! Turns the analyzer's JSON report into per-file [`DiagnosticRecord`]s. The
//! severity threshold is applied per category, before any instance is looked
//! at; instances without a usable path or line are dropped on their own.

use crate::{
    config::AderynConfig,
    proto::{AnalysisReport, DiagnosticRecord, Issue, IssueInstance, RecordMetadata, Severity, END_OF_LINE},
    scan::errors::{AnalysisError, AnalysisResult},
};
use std::{
    collections::HashMap,
    fs,
    io,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, warn};

/// Records grouped by absolute file path, in report order within each file.
pub type MappedDiagnostics = HashMap<PathBuf, Vec<DiagnosticRecord>>;

/// Reads and decodes a report, then deletes it. The file is removed even when
/// it does not decode.
pub fn load_report(path: &Path) -> AnalysisResult<AnalysisReport> {
    let content = fs::read_to_string(path).map_err(|source| AnalysisError::ReportRead {
        path: path.to_path_buf(),
        source,
    });
    discard_report(path);

    let content = content?;
    let report: AnalysisReport =
        serde_json::from_str(&content).map_err(|source| AnalysisError::ReportDecode {
            path: path.to_path_buf(),
            source,
        })?;

    debug!("Decoded report with {} issues", report.issue_count());
    Ok(report)
}

pub fn discard_report(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed report {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove report {:?}: {}", path, e),
    }
}

/// Owns a run's report path and removes whatever is left there on drop, so a
/// failed, timed out or cancelled run leaves nothing behind.
#[derive(Debug)]
pub struct ReportFile {
    path: PathBuf,
}

impl ReportFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> AnalysisResult<AnalysisReport> {
        load_report(&self.path)
    }
}

impl Drop for ReportFile {
    fn drop(&mut self) {
        discard_report(&self.path);
    }
}

pub struct ReportMapper<'a> {
    config: &'a AderynConfig,
    root: &'a Path,
}

impl<'a> ReportMapper<'a> {
    pub fn new(config: &'a AderynConfig, root: &'a Path) -> Self {
        Self { config, root }
    }

    pub fn map(&self, report: &AnalysisReport) -> MappedDiagnostics {
        let mut mapped = MappedDiagnostics::new();
        let mut dropped = 0usize;

        for (label, category) in report.categories() {
            let Some(category) = category else {
                continue;
            };

            let severity = self.config.severity_for(label);
            if !severity.meets(self.config.min_severity) {
                debug!(
                    "Skipping '{}' issues: {} is below minimum {}",
                    label, severity, self.config.min_severity
                );
                continue;
            }

            for issue in &category.issues {
                for instance in &issue.instances {
                    match self.map_instance(label, severity, issue, instance) {
                        Some(record) => mapped.entry(record.path.clone()).or_default().push(record),
                        None => dropped += 1,
                    }
                }
            }
        }

        if dropped > 0 {
            debug!("Dropped {} instances without a usable path or line", dropped);
        }
        debug!(
            "Mapped {} records across {} files",
            mapped.values().map(Vec::len).sum::<usize>(),
            mapped.len()
        );

        mapped
    }

    fn map_instance(
        &self,
        label: &str,
        severity: Severity,
        issue: &Issue,
        instance: &IssueInstance,
    ) -> Option<DiagnosticRecord> {
        let contract_path = instance.path()?;
        let line = instance.line()?.saturating_sub(1);
        let hint = instance.hint().map(str::to_string);

        Some(DiagnosticRecord {
            path: self.resolve_path(contract_path),
            line,
            end_line: line,
            column: 0,
            end_column: END_OF_LINE,
            severity,
            message: compose_message(issue, hint.as_deref()),
            metadata: RecordMetadata {
                severity_label: label.to_string(),
                detector_name: issue.detector_name.clone(),
                title: issue.title.clone(),
                description: issue.description.clone(),
                hint,
                src_char: instance.source_offset(),
            },
        })
    }

    fn resolve_path(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&self.root.join(path))
        }
    }
}

pub fn compose_message(issue: &Issue, hint: Option<&str>) -> String {
    let mut message = format!(
        "{}: {} [{}]",
        issue.title.trim(),
        issue.description.trim(),
        issue.detector_name
    );
    if let Some(hint) = hint {
        message.push_str(" Hint: ");
        message.push_str(hint);
    }
    message
}

/// Lexically removes `.` and `..` components. Does not touch the filesystem,
/// so symlinks are left alone.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }

    normalized
}
