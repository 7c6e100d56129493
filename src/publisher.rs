//! Packaging open batches into lineage-linked dataset versions.
//!
//! A publish holds the critical section of every contributing stream from
//! collecting files until rotation, so no append can land in a batch after
//! its files were handed to the store. Rotation happens strictly after the
//! store confirmed the finalize; any earlier failure leaves every batch open
//! and the publish can simply be retried.
use crate::batch_log::BatchLog;
use crate::error::PublishError;
use crate::registry::{lock_slot, BatchRegistry, BatchSlot, SharedSlot};
use crate::store::{DraftVersion, VersionStore};
use crate::types::{BatchId, DatasetVersion, StreamName};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Result of a publish attempt that did not fail.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// The version exists. Streams in `unrotated` are still on the packaged
    /// batch; packaging them again chains another version onto this one.
    Published {
        version: DatasetVersion,
        rotations: Vec<Rotation>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        unrotated: Vec<RotationFailure>,
    },
    /// Nothing was collected; no version was created and nothing rotated.
    NoOp,
}

/// One stream moved off a packaged batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rotation {
    pub stream: StreamName,
    pub retired: BatchId,
    pub current: BatchId,
    pub records: u64,
}

/// A stream that could not move off a batch that is already packaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationFailure {
    pub stream: StreamName,
    pub batch: BatchId,
    pub error: String,
}

pub struct VersionPublisher<S> {
    store: S,
    log: Arc<BatchLog>,
    registry: Arc<BatchRegistry>,
    collection: String,
    writer: Mutex<()>,
}

impl<S: VersionStore> VersionPublisher<S> {
    pub fn new(
        store: S,
        log: Arc<BatchLog>,
        registry: Arc<BatchRegistry>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            log,
            registry,
            collection: collection.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Package one batch.
    pub fn publish(&self, batch: &BatchId) -> Result<PublishOutcome, PublishError> {
        self.publish_batches(std::slice::from_ref(batch))
    }

    /// Package the current batch of each listed stream into a single version.
    pub fn publish_current(&self, streams: &[StreamName]) -> Result<PublishOutcome, PublishError> {
        let batches: Vec<BatchId> = streams
            .iter()
            .filter_map(|stream| self.registry.existing_slot(stream))
            .map(|slot| lock_slot(&slot).batch_id())
            .collect();
        self.publish_batches(&batches)
    }

    /// Package several batches into a single version.
    ///
    /// Batches a stream has already rotated away from are skipped, so
    /// republishing a packaged batch is a no-op.
    pub fn publish_batches(&self, batches: &[BatchId]) -> Result<PublishOutcome, PublishError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let batches: BTreeSet<BatchId> = batches.iter().copied().collect();

        let mut streams = BTreeSet::new();
        for batch in &batches {
            streams.extend(self.log.files_for(batch).into_keys());
        }
        let held: Vec<(StreamName, SharedSlot)> = streams
            .into_iter()
            .filter_map(|stream| match self.registry.existing_slot(&stream) {
                Some(slot) => Some((stream, slot)),
                None => {
                    tracing::warn!(stream = %stream, "indexed stream has no registry entry");
                    None
                }
            })
            .collect();
        // Sorted by stream name, so concurrent publishers lock in one order.
        let mut guards: BTreeMap<StreamName, MutexGuard<'_, BatchSlot>> = held
            .iter()
            .map(|(stream, slot)| (stream.clone(), lock_slot(slot)))
            .collect();

        let mut live: Vec<(StreamName, BatchId)> = Vec::new();
        let mut files = Vec::new();
        for batch in &batches {
            for (stream, path) in self.log.files_for(batch) {
                let Some(guard) = guards.get(&stream) else {
                    continue;
                };
                if guard.batch_id() != *batch {
                    tracing::debug!(stream = %stream, batch = %batch, "batch already packaged");
                    continue;
                }
                live.push((stream, *batch));
                files.push(path);
            }
        }
        live.sort();
        if files.is_empty() {
            tracing::info!(collection = %self.collection, "nothing to package");
            return Ok(PublishOutcome::NoOp);
        }

        let version = self.finalize_version(&files)?;

        let mut rotations = Vec::new();
        let mut unrotated = Vec::new();
        for (stream, retiring) in live {
            let Some(guard) = guards.get_mut(&stream) else {
                continue;
            };
            let records = guard.count();
            match self.registry.rotate_slot(&stream, guard, &retiring) {
                Ok(current) => rotations.push(Rotation {
                    stream,
                    retired: retiring,
                    current,
                    records,
                }),
                Err(err) => {
                    tracing::error!(
                        stream = %stream,
                        batch = %retiring,
                        version = %version.id,
                        error = %err,
                        "version finalized but batch rotation failed"
                    );
                    unrotated.push(RotationFailure {
                        stream,
                        batch: retiring,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(PublishOutcome::Published {
            version,
            rotations,
            unrotated,
        })
    }

    fn finalize_version(&self, files: &[PathBuf]) -> Result<DatasetVersion, PublishError> {
        let latest = self.store.latest_version(&self.collection)?;
        let mut draft = self.store.create_version(&self.collection, latest.as_ref())?;
        tracing::info!(
            collection = %self.collection,
            draft = %draft.id(),
            parent = ?latest,
            files = files.len(),
            "packaging batch"
        );
        draft.add_files(files)?;
        let version = draft.finalize()?;
        Ok(version)
    }
}

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;
