//! Typed paths into a workspace layout.
//!
//! ```text
//! <workspace>/
//!   relabel.json          config
//!   .relabel.lock         cross-process writer lock
//!   flagged/              one CSV log per (stream, batch)
//!   flagged/index.json    batch id -> stream -> log file
//!   state/registry.json   current batch id per stream
//!   datasets/             local versioned store
//! ```
use crate::types::{BatchId, StreamName};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Workspace config file name.
pub const CONFIG_FILE: &str = "relabel.json";

#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the `relabel.json` path.
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Return the `.relabel.lock` path.
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".relabel.lock")
    }

    /// Return the `flagged/` directory holding correction logs.
    pub fn flagged_dir(&self) -> PathBuf {
        self.root.join("flagged")
    }

    /// Return the `state/registry.json` path.
    pub fn registry_path(&self) -> PathBuf {
        self.root.join("state").join("registry.json")
    }

    /// Return the default `datasets/` store root.
    pub fn datasets_dir(&self) -> PathBuf {
        self.root.join("datasets")
    }
}

/// File name of the log for one `(stream, batch)` pair.
pub fn log_file_name(stream: &StreamName, batch: &BatchId) -> String {
    format!("{stream}_{batch}.csv")
}

/// Write `bytes` to `path` through a sibling temp file and rename, so readers
/// see either the old or the new content.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("staged");
    let tmp_path = path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{file_name}.tmp"));
    let mut file = File::create(&tmp_path)?;
    file.write_all(bytes)?;
    // Content must be durable before the rename can make it visible.
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp_path, path)
}
