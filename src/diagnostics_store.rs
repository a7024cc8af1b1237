//! Published diagnostics
//!
//! Remembers what was last published per document so a run can replace it
//! wholesale: every document that is open, or that received diagnostics last
//! time, gets the complete new set, which may be empty. Nothing is merged
//! across runs.
//!
//! Records for files the editor does not have open are skipped. Publishing
//! and clearing are serialised by a lock, and the publisher's gate is checked
//! under it, so a clear can never be followed by a stale publish.

use crate::workspace::WorkspaceManager;
use anyhow::Result;
use crossbeam_channel::Sender;
use dashmap::DashMap;
use lsp_server::{Message, Notification};
use lsp_types::{
    notification::{Notification as _, PublishDiagnostics},
    Diagnostic, PublishDiagnosticsParams, Url,
};
use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct PublishSummary {
    /// Documents that received a non-empty set.
    pub files: Vec<Url>,

    pub published: usize,

    /// Documents that were sent an empty set.
    pub cleared: usize,

    /// Files with records that are not open in the editor.
    pub skipped_files: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticsStore {
    published: Arc<DashMap<Url, Vec<Diagnostic>>>,

    update_lock: Arc<Mutex<()>>,
}

impl DiagnosticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the published set. Returns `None` without sending anything
    /// when `gate` says the results are no longer wanted.
    pub fn publish(
        &self,
        sender: &Sender<Message>,
        workspace: &WorkspaceManager,
        filetypes: &[String],
        diagnostics_by_file: HashMap<PathBuf, Vec<Diagnostic>>,
        gate: impl FnOnce() -> bool,
    ) -> Result<Option<PublishSummary>> {
        let _guard = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !gate() {
            debug!("Publish gate closed, discarding results");
            return Ok(None);
        }

        let mut summary = PublishSummary::default();
        let mut next: HashMap<Url, Vec<Diagnostic>> = HashMap::new();

        for (path, diagnostics) in diagnostics_by_file {
            match workspace.find_document_by_path(&path) {
                Some(doc) => {
                    next.entry(doc.uri).or_default().extend(diagnostics);
                }
                None => {
                    debug!("{:?} is not open, skipping {} diagnostics", path, diagnostics.len());
                    summary.skipped_files += 1;
                }
            }
        }

        let mut targets: HashSet<Url> = next.keys().cloned().collect();
        targets.extend(
            workspace
                .get_watched_documents(filetypes)
                .into_iter()
                .map(|doc| doc.uri),
        );
        targets.extend(self.published_uris());

        for uri in targets {
            let diagnostics = next.remove(&uri).unwrap_or_default();
            let version = workspace.get_document(&uri).map(|doc| doc.version);

            debug!(
                "Publishing {} diagnostics for {} (version {:?})",
                diagnostics.len(),
                uri,
                version
            );
            send_diagnostics(sender, uri.clone(), diagnostics.clone(), version)?;

            if diagnostics.is_empty() {
                summary.cleared += 1;
                self.published.remove(&uri);
            } else {
                summary.published += diagnostics.len();
                summary.files.push(uri.clone());
                self.published.insert(uri, diagnostics);
            }
        }

        Ok(Some(summary))
    }

    /// Publishes an empty set to every document that has diagnostics from us
    /// and forgets them. Returns how many documents were cleared.
    pub fn clear_all(&self, sender: &Sender<Message>) -> Result<usize> {
        let _guard = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let uris = self.published_uris();
        for uri in &uris {
            send_diagnostics(sender, uri.clone(), Vec::new(), None)?;
            self.published.remove(uri);
        }

        debug!("Cleared diagnostics for {} documents", uris.len());
        Ok(uris.len())
    }

    /// First diagnostic in `uri` whose line span covers `line`.
    pub fn find_at_line(&self, uri: &Url, line: u32) -> Option<Diagnostic> {
        self.published.get(uri).and_then(|diagnostics| {
            diagnostics
                .iter()
                .find(|d| d.range.start.line <= line && line <= d.range.end.line)
                .cloned()
        })
    }

    pub fn get(&self, uri: &Url) -> Vec<Diagnostic> {
        self.published
            .get(uri)
            .map(|diagnostics| diagnostics.clone())
            .unwrap_or_default()
    }

    pub fn published_uris(&self) -> Vec<Url> {
        self.published.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn total_count(&self) -> usize {
        self.published.iter().map(|entry| entry.value().len()).sum()
    }
}

fn send_diagnostics(
    sender: &Sender<Message>,
    uri: Url,
    diagnostics: Vec<Diagnostic>,
    version: Option<i32>,
) -> Result<()> {
    let params = PublishDiagnosticsParams {
        uri,
        diagnostics,
        version,
    };
    let notification = Notification::new(
        PublishDiagnostics::METHOD.to_string(),
        serde_json::to_value(params)?,
    );
    sender.send(notification.into())?;
    Ok(())
}
