//! Aderyn LSP Server
//!
//! Runs the Aderyn static analyzer over a Solidity project and shows its
//! findings as editor diagnostics. The analyzer is an external process that
//! writes a JSON report; this crate invokes it, maps the report into
//! per-file diagnostics filtered by a severity threshold, and publishes them
//! to the documents the editor has open.
//!
//! Runs are serialised on one worker thread, so results from two runs never
//! interleave. Configuration lives in a session-owned store that the
//! protocol handlers mutate and the worker snapshots per run.

pub mod config;
pub mod diagnostics;
pub mod diagnostics_store;
pub mod notify;
pub mod proto;
pub mod report;
pub mod runner;
pub mod scan;
pub mod server;
pub mod workspace;

pub use config::{AderynConfig, ConfigStore};
pub use diagnostics::DiagnosticsMapper;
pub use diagnostics_store::DiagnosticsStore;
pub use report::ReportMapper;
pub use runner::AnalyzerRunner;
pub use scan::ScanManager;
pub use server::AderynLspServer;
pub use workspace::WorkspaceManager;
