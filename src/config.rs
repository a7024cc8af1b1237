//! Configuration management
//!
//! Auditors want every finding the analyzer reports, while developers in the
//! middle of a change only want the high-severity ones. Clients can push live
//! updates through workspace/didChangeConfiguration, so partial updates are
//! merged depth-first over the existing settings instead of replacing them.
//!
//! The configuration is owned by the server session through `ConfigStore`.
//! Mutation goes through its entry points (setup, toggle, minimum severity) and
//! every analysis run works on its own snapshot, so a run never observes a
//! half-applied update.

use crate::proto::Severity;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info};

/// Key under which clients may nest the settings.
pub const SETTINGS_SECTION: &str = "aderyn";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid minimum severity '{0}' (expected one of error, warn, info, hint)")]
    InvalidSeverity(String),

    #[error("Settings must be a JSON object, got {0}")]
    NotAnObject(String),

    #[error("Invalid configuration: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AderynConfig {
    pub enabled: bool,

    /// Analyzer executable, looked up on the search path.
    pub command: String,

    /// Explicit analysis root. When unset the root is discovered from `root_markers`.
    pub root: Option<PathBuf>,

    pub root_markers: Vec<String>,

    pub severity_map: HashMap<String, Severity>,

    pub default_severity: Severity,

    pub min_severity: Severity,

    pub extra_args: Vec<String>,

    pub filetypes: Vec<String>,

    pub run_on_save: bool,

    pub run_on_start: bool,

    pub timeout_seconds: u64,

    /// Keys this version does not know about, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for AderynConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "aderyn".to_string(),
            root: None,
            root_markers: vec![
                "aderyn.toml".to_string(),
                "foundry.toml".to_string(),
                "hardhat.config.js".to_string(),
                "hardhat.config.ts".to_string(),
                "truffle-config.js".to_string(),
                ".git".to_string(),
            ],
            severity_map: HashMap::from([
                ("high".to_string(), Severity::Error),
                ("low".to_string(), Severity::Warn),
            ]),
            default_severity: Severity::Warn,
            min_severity: Severity::Hint,
            extra_args: Vec::new(),
            filetypes: vec!["solidity".to_string(), "sol".to_string()],
            run_on_save: true,
            run_on_start: true,
            timeout_seconds: 300,
            extra: serde_json::Map::new(),
        }
    }
}

impl AderynConfig {
    /// Builds a configuration from initialization options, accepting the
    /// settings either directly or nested under `aderyn`.
    pub fn from_lsp_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.merge(value)?;
        Ok(config)
    }

    /// Deep-merges `overrides` over the current values. Leaves `self`
    /// untouched when the merged result is invalid.
    pub fn merge(&mut self, overrides: serde_json::Value) -> Result<(), ConfigError> {
        let overrides = Self::unwrap_section(overrides)?;

        let mut merged = serde_json::to_value(&*self)?;
        merge_json(&mut merged, overrides);

        let candidate: AderynConfig = serde_json::from_value(merged)?;
        candidate.validate().map_err(ConfigError::Invalid)?;

        *self = candidate;
        debug!("Configuration merged: {:?}", self);
        Ok(())
    }

    /// Picks the `aderyn` section out of a settings payload when there is
    /// one. Sibling sections belong to other tools and are ignored.
    fn unwrap_section(value: serde_json::Value) -> Result<serde_json::Value, ConfigError> {
        match value {
            serde_json::Value::Null => Ok(serde_json::Value::Object(serde_json::Map::new())),
            serde_json::Value::Object(mut map) => match map.remove(SETTINGS_SECTION) {
                Some(section @ serde_json::Value::Object(_)) => Ok(section),
                Some(section) => {
                    map.insert(SETTINGS_SECTION.to_string(), section);
                    Ok(serde_json::Value::Object(map))
                }
                None => Ok(serde_json::Value::Object(map)),
            },
            other => Err(ConfigError::NotAnObject(other.to_string())),
        }
    }

    /// Normalised severity for an external category label.
    pub fn severity_for(&self, label: &str) -> Severity {
        self.severity_map
            .get(label)
            .copied()
            .unwrap_or(self.default_severity)
    }

    pub fn get_run_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.command.trim().is_empty() {
            return Err("Analyzer command must not be empty".to_string());
        }

        if self.timeout_seconds == 0 {
            return Err("Run timeout must be greater than 0".to_string());
        }

        if self.filetypes.is_empty() {
            return Err("At least one watched file type is required".to_string());
        }

        Ok(())
    }
}

/// Recursively merges `patch` into `base`. Objects merge key by key; any other
/// value replaces what was there.
pub fn merge_json(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value)
                    }
                    _ => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

/// What a settings update changed, as far as the published diagnostics care.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigChange {
    pub enabled: Option<bool>,
    pub rerun_needed: bool,
}

impl ConfigChange {
    fn between(before: &AderynConfig, after: &AderynConfig) -> Self {
        Self {
            enabled: (before.enabled != after.enabled).then_some(after.enabled),
            rerun_needed: before.min_severity != after.min_severity
                || before.default_severity != after.default_severity
                || before.severity_map != after.severity_map,
        }
    }

    pub fn disabled(&self) -> bool {
        self.enabled == Some(false)
    }
}

/// Session-scoped owner of the configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    inner: Arc<RwLock<AderynConfig>>,
}

impl ConfigStore {
    pub fn new(config: AderynConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn snapshot(&self) -> AderynConfig {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .enabled
    }

    /// Merges a settings payload and reports which run-relevant values moved.
    pub fn setup(&self, overrides: serde_json::Value) -> Result<ConfigChange, ConfigError> {
        let mut config = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = config.clone();
        config.merge(overrides)?;
        info!("Configuration updated");
        Ok(ConfigChange::between(&before, &config))
    }

    /// Flips the enabled flag and returns the new value.
    pub fn toggle(&self) -> bool {
        let mut config = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        config.enabled = !config.enabled;
        info!(
            "Analysis {}",
            if config.enabled { "enabled" } else { "disabled" }
        );
        config.enabled
    }

    /// Accepts a label ("warn"), a level (2) or its string form ("2").
    pub fn set_min_severity(&self, level: &serde_json::Value) -> Result<Severity, ConfigError> {
        let severity = match level {
            serde_json::Value::String(label) => label.parse::<Severity>().ok(),
            serde_json::Value::Number(n) => n.as_u64().and_then(Severity::from_level),
            _ => None,
        }
        .ok_or_else(|| {
            ConfigError::InvalidSeverity(match level {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        })?;

        let mut config = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        config.min_severity = severity;
        info!("Minimum severity set to {}", severity);
        Ok(severity)
    }
}
