//! Error taxonomy for the correction core.
//!
//! Storage and remote-version failures propagate unchanged to the immediate
//! caller. Unparseable verdicts and rotation races are absorbed by their own
//! layers and never show up here.
use crate::types::VersionId;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Crate-wide result alias for the workspace facade.
pub type Result<T> = std::result::Result<T, Error>;

/// Local log or state write/read failure.
#[derive(Debug, Error)]
#[error("storage error at {}: {source}", path.display())]
pub struct StorageError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl StorageError {
    pub fn new(path: impl Into<PathBuf>, source: impl Into<io::Error>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
        }
    }
}

/// Attach the path that was being touched to an I/O-ish failure.
pub(crate) trait StorageContext<T> {
    fn at(self, path: &Path) -> std::result::Result<T, StorageError>;
}

impl<T, E: Into<io::Error>> StorageContext<T> for std::result::Result<T, E> {
    fn at(self, path: &Path) -> std::result::Result<T, StorageError> {
        self.map_err(|err| StorageError::new(path, err))
    }
}

/// Failure reported by the versioned-storage collaborator.
#[derive(Debug, Error)]
pub enum RemoteVersionError {
    #[error("version store I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("lineage conflict in {collection}: expected parent {expected:?}, latest is {actual:?}")]
    LineageConflict {
        collection: String,
        expected: Option<VersionId>,
        actual: Option<VersionId>,
    },
    #[error("parent version {0} does not exist or is not finalized")]
    MissingParent(VersionId),
    #[error("version store for {collection} busy after {waited_ms} ms")]
    Timeout { collection: String, waited_ms: u64 },
    #[error("corrupt version record at {}: {detail}", path.display())]
    Corrupt { path: PathBuf, detail: String },
    #[error("version store rejected request: {0}")]
    Rejected(String),
}

impl RemoteVersionError {
    pub(crate) fn io(path: &Path, source: impl Into<io::Error>) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }
}

/// Why a publish attempt did not produce a version.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Remote(#[from] RemoteVersionError),
}

/// Invalid or unreadable workspace configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("write config {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Inference command failure.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("no model command configured for stream {0}")]
    NotConfigured(String),
    #[error("parse model command {command:?}: {detail}")]
    Command { command: String, detail: String },
    #[error("run model command {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("model command exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("unrecognized model response: {0}")]
    Response(String),
}

/// Umbrella error for the workspace facade.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Remote(#[from] RemoteVersionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("workspace lock {} held by another process (waited {waited_ms} ms)", path.display())]
    Locked { path: PathBuf, waited_ms: u64 },
}

impl From<PublishError> for Error {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Remote(err) => Error::Remote(err),
        }
    }
}
