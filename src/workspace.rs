//! Workspace management
//!
//! Tracks which documents the editor has open. Diagnostics are only ever
//! published for open documents, and the analyzer's report names files by
//! path, so lookups go both ways: by URI for LSP events and by filesystem path
//! for report records.
//!
//! DashMap lets the run worker read the open set while the main loop applies
//! edits.

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use lsp_types::{InitializeParams, TextDocumentItem, Url, WorkspaceFolder};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub uri: Url,
    pub language_id: String,
    pub version: i32,
}

impl DocumentInfo {
    pub fn path(&self) -> Option<PathBuf> {
        self.uri.to_file_path().ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceManager {
    workspace_folders: Arc<RwLock<Vec<WorkspaceFolder>>>,

    open_documents: Arc<DashMap<Url, DocumentInfo>>,

    workspace_root: Option<PathBuf>,
}

impl WorkspaceManager {
    pub fn new(init_params: &InitializeParams) -> Self {
        let workspace_folders = init_params.workspace_folders.clone().unwrap_or_default();
        let workspace_root = Self::determine_workspace_root(init_params);

        info!("Initialized workspace with root: {:?}", workspace_root);
        if !workspace_folders.is_empty() {
            info!(
                "Workspace folders: {:?}",
                workspace_folders.iter().map(|f| &f.uri).collect::<Vec<_>>()
            );
        }

        Self {
            workspace_folders: Arc::new(RwLock::new(workspace_folders)),
            open_documents: Arc::new(DashMap::new()),
            workspace_root,
        }
    }

    /// Root used when a run has no triggering document: the first current
    /// workspace folder, else whatever the client named at initialization.
    pub fn get_workspace_root(&self) -> Option<PathBuf> {
        self.get_workspace_folders()
            .iter()
            .find_map(|folder| folder.uri.to_file_path().ok())
            .or_else(|| self.workspace_root.clone())
    }

    pub fn get_workspace_folders(&self) -> Vec<WorkspaceFolder> {
        self.workspace_folders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn add_document(&self, document: TextDocumentItem) {
        let doc_info = DocumentInfo {
            uri: document.uri.clone(),
            language_id: document.language_id,
            version: document.version,
        };

        debug!("Adding document: {}", document.uri);
        self.open_documents.insert(document.uri, doc_info);
    }

    /// Records the client's latest version. Text is never kept: the analyzer
    /// reads saved files from disk.
    pub fn update_document(&self, uri: &Url, version: i32) -> Result<()> {
        let mut doc = self
            .open_documents
            .get_mut(uri)
            .ok_or_else(|| anyhow!("Document not found: {}", uri))?;

        doc.version = version;
        debug!("Updated document: {} (version {})", uri, version);
        Ok(())
    }

    pub fn remove_document(&self, uri: &Url) {
        debug!("Removing document: {}", uri);
        self.open_documents.remove(uri);
    }

    pub fn get_document(&self, uri: &Url) -> Option<DocumentInfo> {
        self.open_documents.get(uri).map(|doc| doc.clone())
    }

    pub fn get_open_documents(&self) -> Vec<DocumentInfo> {
        self.open_documents
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn is_document_open(&self, uri: &Url) -> bool {
        self.open_documents.contains_key(uri)
    }

    /// Finds the open document backed by `path`. Compares decoded file paths
    /// rather than URI strings, since clients differ in how they escape them.
    pub fn find_document_by_path(&self, path: &Path) -> Option<DocumentInfo> {
        self.open_documents
            .iter()
            .find(|entry| entry.value().path().as_deref() == Some(path))
            .map(|entry| entry.value().clone())
    }

    /// Open documents whose language or extension is in `filetypes`.
    pub fn get_watched_documents(&self, filetypes: &[String]) -> Vec<DocumentInfo> {
        self.open_documents
            .iter()
            .filter(|entry| Self::is_watched(&entry.uri, &entry.language_id, filetypes))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// A document is watched when its language id, or its file extension,
    /// appears in `filetypes`.
    pub fn is_watched(uri: &Url, language_id: &str, filetypes: &[String]) -> bool {
        if filetypes.iter().any(|ft| ft.eq_ignore_ascii_case(language_id)) {
            return true;
        }

        let extension = uri
            .path()
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext);

        match extension {
            Some(ext) => filetypes.iter().any(|ft| ft.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    pub fn update_workspace_folders(&self, folders: Vec<WorkspaceFolder>) {
        info!(
            "Updating workspace folders: {:?}",
            folders.iter().map(|f| &f.uri).collect::<Vec<_>>()
        );
        *self
            .workspace_folders
            .write()
            .unwrap_or_else(PoisonError::into_inner) = folders;
    }

    pub fn get_stats(&self) -> WorkspaceStats {
        WorkspaceStats {
            open_documents: self.open_documents.len(),
            workspace_folders: self.get_workspace_folders().len(),
        }
    }

    fn determine_workspace_root(init_params: &InitializeParams) -> Option<PathBuf> {
        if let Some(folders) = &init_params.workspace_folders {
            if let Some(first_folder) = folders.first() {
                if let Ok(path) = first_folder.uri.to_file_path() {
                    return Some(path);
                }
            }
        }

        #[allow(deprecated)]
        if let Some(root_uri) = &init_params.root_uri {
            if let Ok(path) = root_uri.to_file_path() {
                return Some(path);
            }
        }

        #[allow(deprecated)]
        if let Some(root_path) = &init_params.root_path {
            return Some(PathBuf::from(root_path));
        }

        warn!("No workspace root found in initialization parameters");
        None
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkspaceStats {
    pub open_documents: usize,
    pub workspace_folders: usize,
}
