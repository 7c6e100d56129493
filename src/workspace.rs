//! Workspace facade tying config, logs, registry, and the version store.
//!
//! Commands that mutate shared state open the workspace exclusively, which
//! holds `.relabel.lock` for the workspace's lifetime. Read-only commands
//! open it without the lock and never mint batches.
use crate::batch_log::BatchLog;
use crate::config::{self, Config};
use crate::error::{ConfigError, Error, InferenceError, Result, StorageError};
use crate::inference::{self, Classification};
use crate::label::{LabelParser, Verdict};
use crate::lock::{AcquireError, WriterLock};
use crate::paths::WorkspacePaths;
use crate::publisher::{PublishOutcome, VersionPublisher};
use crate::registry::{lock_slot, BatchRegistry};
use crate::store::{LocalVersionStore, VersionStore};
use crate::types::{BatchId, CorrectionRecord, DatasetVersion, StreamName, VersionId};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What happened to a submitted correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Submission {
    Recorded {
        stream: StreamName,
        batch: BatchId,
        count: u64,
    },
    /// The verdict did not parse; nothing was written.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub stream: StreamName,
    pub batch: BatchId,
    pub count: u64,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceStatus {
    pub collection: String,
    pub latest_version: Option<VersionId>,
    pub streams: Vec<StreamStatus>,
}

pub struct Workspace {
    paths: WorkspacePaths,
    config: Config,
    parser: LabelParser,
    log: Arc<BatchLog>,
    registry: Arc<BatchRegistry>,
    publisher: VersionPublisher<LocalVersionStore>,
    // Dropped last.
    _lock: Option<WriterLock>,
}

impl Workspace {
    /// Write a fresh `relabel.json` and the log directory.
    ///
    /// Refuses to overwrite an existing config unless `force` is set.
    pub fn init(root: &Path, config: &Config, force: bool) -> Result<WorkspacePaths> {
        config::validate_config(config)?;
        let paths = WorkspacePaths::new(root.to_path_buf());
        let config_path = paths.config_path();
        if config_path.is_file() && !force {
            return Err(ConfigError::Invalid(format!(
                "{} already exists (use --force to overwrite)",
                config_path.display()
            ))
            .into());
        }
        config::write_config(root, config)?;
        let flagged = paths.flagged_dir();
        fs::create_dir_all(&flagged).map_err(|source| StorageError::new(&flagged, source))?;
        tracing::info!(root = %root.display(), collection = %config.collection(), "workspace initialized");
        Ok(paths)
    }

    /// Open for reading. Nothing is written and no lock is taken.
    pub fn open(root: &Path) -> Result<Self> {
        Self::load(root, false)
    }

    /// Open for writing, holding the workspace lock until dropped.
    pub fn open_exclusive(root: &Path) -> Result<Self> {
        Self::load(root, true)
    }

    fn load(root: &Path, exclusive: bool) -> Result<Self> {
        let paths = WorkspacePaths::new(root.to_path_buf());
        let config = config::load_config(root)?;
        let table = config::validate_config(&config)?;
        let lock_wait = Duration::from_millis(config.lock_wait_ms);

        let lock = if exclusive {
            let lock_path = paths.lock_path();
            match WriterLock::acquire(&lock_path, lock_wait) {
                Ok(lock) => Some(lock),
                Err(AcquireError::Busy { waited_ms }) => {
                    return Err(Error::Locked {
                        path: lock_path,
                        waited_ms,
                    })
                }
                Err(AcquireError::Io(source)) => {
                    return Err(StorageError::new(lock_path, source).into())
                }
            }
        } else {
            None
        };

        let log = Arc::new(BatchLog::open(paths.flagged_dir())?);
        let registry = Arc::new(BatchRegistry::open(paths.registry_path(), log.as_ref())?);
        let store_root = config
            .store_root
            .as_ref()
            .map(|rel| root.join(rel))
            .unwrap_or_else(|| paths.datasets_dir());
        let store = LocalVersionStore::new(store_root, lock_wait);
        let publisher = VersionPublisher::new(
            store,
            Arc::clone(&log),
            Arc::clone(&registry),
            config.collection(),
        );
        Ok(Self {
            paths,
            config,
            parser: LabelParser::new(table),
            log,
            registry,
            publisher,
            _lock: lock,
        })
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn parser(&self) -> &LabelParser {
        &self.parser
    }

    pub fn log(&self) -> &BatchLog {
        &self.log
    }

    pub fn registry(&self) -> &BatchRegistry {
        &self.registry
    }

    /// Ask the stream's model for a verdict on `sentence`.
    pub fn classify(&self, stream: &StreamName, sentence: &str) -> Result<Classification> {
        let command = config::resolve_model_command(&self.config, stream)
            .ok_or_else(|| InferenceError::NotConfigured(stream.to_string()))?;
        let classification = inference::classify(&command, sentence, &self.parser)?;
        tracing::debug!(stream = %stream, label = %classification.label, "classified");
        Ok(classification)
    }

    /// Record a flagged `verdict` for `text` under the label it names.
    pub fn submit(&self, stream: &StreamName, text: &str, verdict: &str) -> Result<Submission> {
        let Verdict::Label { code, .. } = self.parser.parse(verdict) else {
            tracing::warn!(stream = %stream, "unparseable verdict, correction skipped");
            return Ok(Submission::Skipped);
        };
        let record = CorrectionRecord::new(code, text);
        let appended = self
            .registry
            .append_with(stream, |batch| -> std::result::Result<(), StorageError> {
                self.log.append(stream, batch, &record)
            })?;
        tracing::info!(
            stream = %stream,
            batch = %appended.batch,
            count = appended.count,
            "{} labeled samples",
            appended.count
        );
        Ok(Submission::Recorded {
            stream: stream.clone(),
            batch: appended.batch,
            count: appended.count,
        })
    }

    /// Package the current batches of `streams` (all known streams when
    /// empty) into one dataset version.
    pub fn package(&self, streams: &[StreamName]) -> Result<PublishOutcome> {
        let streams = if streams.is_empty() {
            self.registry.streams()
        } else {
            streams.to_vec()
        };
        Ok(self.publisher.publish_current(&streams)?)
    }

    /// Package one specific batch id.
    pub fn package_batch(&self, batch: &BatchId) -> Result<PublishOutcome> {
        Ok(self.publisher.publish(batch)?)
    }

    pub fn status(&self) -> Result<WorkspaceStatus> {
        let mut streams = Vec::new();
        for stream in self.registry.streams() {
            let Some(slot) = self.registry.existing_slot(&stream) else {
                continue;
            };
            let (batch, count) = {
                let guard = lock_slot(&slot);
                (guard.batch_id(), guard.count())
            };
            streams.push(StreamStatus {
                log_path: self.log.log_path(&stream, &batch),
                stream,
                batch,
                count,
            });
        }
        Ok(WorkspaceStatus {
            collection: self.publisher.collection().to_string(),
            latest_version: self
                .publisher
                .store()
                .latest_version(self.publisher.collection())?,
            streams,
        })
    }

    /// Published versions, newest first.
    pub fn history(&self) -> Result<Vec<DatasetVersion>> {
        Ok(self
            .publisher
            .store()
            .lineage(self.publisher.collection())?)
    }

    /// Directory holding the packaged files of a version.
    pub fn version_files_dir(&self, id: &VersionId) -> PathBuf {
        self.publisher
            .store()
            .files_dir(self.publisher.collection(), id)
    }
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
