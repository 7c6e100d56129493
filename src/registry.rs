//! Current batch id and record count per stream.
//!
//! Each stream owns one [`BatchSlot`] behind its own mutex, so appends on one
//! stream never wait on another. The current batch ids are persisted in
//! `state/registry.json` before they become visible; counts are not
//! persisted and are rebuilt from the logs on open.
use crate::batch_log::BatchLog;
use crate::error::{StorageContext, StorageError};
use crate::paths::write_atomic;
use crate::types::{BatchId, StreamName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Current schema version for `state/registry.json`.
pub const REGISTRY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    schema_version: u32,
    /// stream -> current batch id
    #[serde(default)]
    streams: BTreeMap<String, String>,
}

/// Source of truth for how many record rows a log already holds.
pub trait RecordCounter {
    fn count_records(&self, stream: &StreamName, batch: &BatchId) -> Result<u64, StorageError>;
}

impl RecordCounter for BatchLog {
    fn count_records(&self, stream: &StreamName, batch: &BatchId) -> Result<u64, StorageError> {
        BatchLog::count_records(self, stream, batch)
    }
}

/// The live batch of one stream and the rows appended to it so far.
#[derive(Debug)]
pub struct BatchSlot {
    batch_id: BatchId,
    count: u64,
}

impl BatchSlot {
    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

pub type SharedSlot = Arc<Mutex<BatchSlot>>;

/// Lock a slot, recovering the data if a previous holder panicked.
pub fn lock_slot(slot: &SharedSlot) -> MutexGuard<'_, BatchSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where a row landed and the batch's count after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    pub batch: BatchId,
    pub count: u64,
}

#[derive(Debug)]
pub struct BatchRegistry {
    state_path: PathBuf,
    slots: Mutex<BTreeMap<StreamName, SharedSlot>>,
    persisted: Mutex<BTreeMap<StreamName, BatchId>>,
}

impl BatchRegistry {
    /// Load persisted batch ids and reconcile each stream's count by counting
    /// the rows already present in its current log.
    pub fn open(
        state_path: impl Into<PathBuf>,
        counter: &impl RecordCounter,
    ) -> Result<Self, StorageError> {
        let state_path = state_path.into();
        let persisted = load_registry(&state_path)?;
        let mut slots = BTreeMap::new();
        for (stream, batch_id) in &persisted {
            let count = counter.count_records(stream, batch_id)?;
            tracing::debug!(stream = %stream, batch = %batch_id, count, "reconciled batch count");
            slots.insert(
                stream.clone(),
                Arc::new(Mutex::new(BatchSlot {
                    batch_id: *batch_id,
                    count,
                })),
            );
        }
        Ok(Self {
            state_path,
            slots: Mutex::new(slots),
            persisted: Mutex::new(persisted),
        })
    }

    /// The slot for `stream`, minting its first batch on first use.
    pub fn slot(&self, stream: &StreamName) -> Result<SharedSlot, StorageError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(stream) {
            return Ok(Arc::clone(slot));
        }
        let batch_id = BatchId::mint();
        self.persist_with(stream, batch_id)?;
        tracing::info!(stream = %stream, batch = %batch_id, "stream initialized");
        let slot = Arc::new(Mutex::new(BatchSlot { batch_id, count: 0 }));
        slots.insert(stream.clone(), Arc::clone(&slot));
        Ok(slot)
    }

    /// The slot for `stream` if it has ever been used.
    pub fn existing_slot(&self, stream: &StreamName) -> Option<SharedSlot> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream)
            .cloned()
    }

    /// Every stream with a live batch, in name order.
    pub fn streams(&self) -> Vec<StreamName> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn current_batch(&self, stream: &StreamName) -> Result<BatchId, StorageError> {
        let slot = self.slot(stream)?;
        let batch_id = lock_slot(&slot).batch_id;
        Ok(batch_id)
    }

    /// Count one more row in the stream's current batch.
    pub fn record_appended(&self, stream: &StreamName) -> Result<u64, StorageError> {
        let slot = self.slot(stream)?;
        let mut guard = lock_slot(&slot);
        guard.count += 1;
        Ok(guard.count)
    }

    /// Run `write` against the current batch inside the stream's critical
    /// section and count the row only if it succeeded.
    pub fn append_with<E, F>(&self, stream: &StreamName, write: F) -> Result<Appended, E>
    where
        E: From<StorageError>,
        F: FnOnce(&BatchId) -> Result<(), E>,
    {
        let slot = self.slot(stream)?;
        let mut guard = lock_slot(&slot);
        write(&guard.batch_id)?;
        guard.count += 1;
        Ok(Appended {
            batch: guard.batch_id,
            count: guard.count,
        })
    }

    /// Replace `retiring` with a fresh batch and reset the count.
    ///
    /// When the stream has already moved past `retiring`, nothing changes and
    /// the current id is returned, so a losing concurrent rotation observes
    /// the winner's result.
    pub fn rotate(&self, stream: &StreamName, retiring: &BatchId) -> Result<BatchId, StorageError> {
        let slot = self.slot(stream)?;
        let mut guard = lock_slot(&slot);
        self.rotate_slot(stream, &mut guard, retiring)
    }

    /// Rotate a slot the caller already holds locked.
    pub fn rotate_slot(
        &self,
        stream: &StreamName,
        slot: &mut BatchSlot,
        retiring: &BatchId,
    ) -> Result<BatchId, StorageError> {
        if slot.batch_id != *retiring {
            tracing::debug!(
                stream = %stream,
                retiring = %retiring,
                current = %slot.batch_id,
                "batch already rotated"
            );
            return Ok(slot.batch_id);
        }
        let next = BatchId::mint();
        self.persist_with(stream, next)?;
        tracing::info!(
            stream = %stream,
            retired = %retiring,
            batch = %next,
            records = slot.count,
            "batch rotated"
        );
        slot.batch_id = next;
        slot.count = 0;
        Ok(next)
    }

    fn persist_with(&self, stream: &StreamName, batch_id: BatchId) -> Result<(), StorageError> {
        let mut persisted = self
            .persisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = persisted.insert(stream.clone(), batch_id);
        if let Err(err) = write_registry(&self.state_path, &persisted) {
            match previous {
                Some(previous) => persisted.insert(stream.clone(), previous),
                None => persisted.remove(stream),
            };
            return Err(err);
        }
        Ok(())
    }
}

fn load_registry(path: &Path) -> Result<BTreeMap<StreamName, BatchId>, StorageError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let bytes = fs::read(path).at(path)?;
    let file: RegistryFile = serde_json::from_slice(&bytes).at(path)?;
    if file.schema_version != REGISTRY_SCHEMA_VERSION {
        return Err(StorageError::new(
            path,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported registry schema_version {}", file.schema_version),
            ),
        ));
    }
    file.streams
        .into_iter()
        .map(|(stream, batch)| -> Result<(StreamName, BatchId), StorageError> {
            let stream = StreamName::new(stream)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
                .at(path)?;
            let batch: BatchId = batch
                .parse()
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
                .at(path)?;
            Ok((stream, batch))
        })
        .collect()
}

fn write_registry(path: &Path, streams: &BTreeMap<StreamName, BatchId>) -> Result<(), StorageError> {
    let file = RegistryFile {
        schema_version: REGISTRY_SCHEMA_VERSION,
        streams: streams
            .iter()
            .map(|(stream, batch)| (stream.to_string(), batch.to_string()))
            .collect(),
    };
    let text = serde_json::to_string_pretty(&file).at(path)?;
    write_atomic(path, text.as_bytes()).at(path)
}
