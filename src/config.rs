//! Workspace configuration helpers.
//!
//! `relabel.json` names the dataset collection, the label table, and the
//! inference command for each stream. It is loaded, validated, and written in
//! a stable pretty-printed form.
use crate::error::ConfigError;
use crate::label::{LabelEntry, LabelTable};
use crate::paths::WorkspacePaths;
use crate::types::StreamName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Current schema version for `relabel.json`.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Prefix of the per-stream model command override variables.
pub const MODEL_ENV_PREFIX: &str = "RELABEL_MODEL_";

const DEFAULT_LOCK_WAIT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub schema_version: u32,
    /// Dataset project, first segment of the collection.
    pub project: String,
    /// Dataset name within the project.
    pub dataset: String,
    #[serde(default = "default_labels")]
    pub labels: Vec<LabelEntry>,
    /// stream -> inference command (split with shell quoting rules)
    #[serde(default)]
    pub models: BTreeMap<String, String>,
    /// Version store root, relative to the workspace. Defaults to `datasets/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_root: Option<PathBuf>,
    /// How long writers wait for a held lock before giving up.
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
}

impl Config {
    /// Collection key used with the version store.
    pub fn collection(&self) -> String {
        format!("{}/{}", self.project, self.dataset)
    }
}

fn default_labels() -> Vec<LabelEntry> {
    LabelTable::sarcasm().entries().to_vec()
}

fn default_lock_wait_ms() -> u64 {
    DEFAULT_LOCK_WAIT_MS
}

/// Build the config written by `init`.
pub fn default_config() -> Config {
    Config {
        schema_version: CONFIG_SCHEMA_VERSION,
        project: "sarcasm_detector".to_string(),
        dataset: "kaggle_sarcasm".to_string(),
        labels: default_labels(),
        models: BTreeMap::new(),
        store_root: None,
        lock_wait_ms: DEFAULT_LOCK_WAIT_MS,
    }
}

/// Load `relabel.json` from a workspace root.
pub fn load_config(root: &Path) -> Result<Config, ConfigError> {
    let path = WorkspacePaths::new(root.to_path_buf()).config_path();
    let bytes = fs::read(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse { path, source })
}

/// Persist a config in a stable JSON format.
pub fn write_config(root: &Path, config: &Config) -> Result<(), ConfigError> {
    let path = WorkspacePaths::new(root.to_path_buf()).config_path();
    let text = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    fs::create_dir_all(root)
        .and_then(|()| fs::write(&path, format!("{text}\n")))
        .map_err(|source| ConfigError::Write { path, source })
}

/// Validate a config and build its label table.
pub fn validate_config(config: &Config) -> Result<LabelTable, ConfigError> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(ConfigError::Invalid(format!(
            "unsupported config schema_version {}",
            config.schema_version
        )));
    }
    validate_segment(&config.project, "project")?;
    validate_segment(&config.dataset, "dataset")?;
    for (stream, command) in &config.models {
        StreamName::new(stream.as_str())
            .map_err(|err| ConfigError::Invalid(format!("models: {err}")))?;
        if command.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "model command for {stream} must be non-empty"
            )));
        }
    }
    if let Some(store_root) = &config.store_root {
        if store_root.is_absolute()
            || store_root
                .components()
                .any(|component| matches!(component, Component::ParentDir))
        {
            return Err(ConfigError::Invalid(format!(
                "store_root must be a relative path without '..' (got {})",
                store_root.display()
            )));
        }
    }
    LabelTable::new(config.labels.clone())
}

/// Resolve the inference command for a stream.
///
/// `RELABEL_MODEL_<STREAM>` (upper-cased, `-` as `_`) wins over the config.
pub fn resolve_model_command(config: &Config, stream: &StreamName) -> Option<String> {
    let key = format!(
        "{MODEL_ENV_PREFIX}{}",
        stream.as_str().to_ascii_uppercase().replace('-', "_")
    );
    if let Ok(command) = std::env::var(&key) {
        if !command.trim().is_empty() {
            return Some(command);
        }
    }
    config.models.get(stream.as_str()).cloned()
}

fn validate_segment(value: &str, label: &str) -> Result<(), ConfigError> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if !valid {
        return Err(ConfigError::Invalid(format!(
            "{label} must use only [A-Za-z0-9._-] (got {value:?})"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
