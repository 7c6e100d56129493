//! Append-only correction logs, one CSV file per `(stream, batch)`.
//!
//! The log is pure storage: it neither validates that a batch is current nor
//! tracks counts. Which files belong to a batch is recorded in an explicit
//! index (`index.json`) instead of being inferred from file names.
use crate::error::{StorageContext, StorageError};
use crate::label::LabelCode;
use crate::paths::{log_file_name, write_atomic};
use crate::types::{BatchId, CorrectionRecord, StreamName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Fixed header row written once at the top of every log.
pub const HEADER: [&str; 2] = ["label", "comment"];

/// Current schema version for `flagged/index.json`.
pub const INDEX_SCHEMA_VERSION: u32 = 1;

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    schema_version: u32,
    /// batch id -> stream -> log file name
    #[serde(default)]
    batches: BTreeMap<String, BTreeMap<String, String>>,
}

type BatchIndex = BTreeMap<BatchId, BTreeMap<StreamName, String>>;

#[derive(Debug)]
pub struct BatchLog {
    dir: PathBuf,
    index: Mutex<BatchIndex>,
}

impl BatchLog {
    /// Open (creating if needed) the log directory and load its index.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).at(&dir)?;
        let index = load_index(&dir.join(INDEX_FILE))?;
        Ok(Self {
            dir,
            index: Mutex::new(index),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Physical location of the log for `(stream, batch)`.
    pub fn log_path(&self, stream: &StreamName, batch: &BatchId) -> PathBuf {
        self.dir.join(log_file_name(stream, batch))
    }

    /// Append one record, writing the header first when the log is empty.
    ///
    /// The record is flushed and synced before this returns.
    pub fn append(
        &self,
        stream: &StreamName,
        batch: &BatchId,
        record: &CorrectionRecord,
    ) -> Result<(), StorageError> {
        self.ensure_indexed(stream, batch)?;
        let path = self.log_path(stream, batch);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .at(&path)?;
        let needs_header = file.metadata().at(&path)?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::CRLF)
            .from_writer(file);
        if needs_header {
            writer.write_record(HEADER).at(&path)?;
        }
        let code = record.label.code().to_string();
        writer
            .write_record([code.as_str(), record.text.as_str()])
            .at(&path)?;
        let file = writer
            .into_inner()
            .map_err(|err| err.into_error())
            .at(&path)?;
        file.sync_data().at(&path)?;
        tracing::debug!(
            stream = %stream,
            batch = %batch,
            header = needs_header,
            "correction appended"
        );
        Ok(())
    }

    /// All existing log files tagged with `batch`, across every stream.
    pub fn list_files(&self, batch: &BatchId) -> BTreeSet<PathBuf> {
        self.files_for(batch).into_values().collect()
    }

    /// Existing log files for `batch`, keyed by the stream that wrote them.
    pub fn files_for(&self, batch: &BatchId) -> BTreeMap<StreamName, PathBuf> {
        let index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(streams) = index.get(batch) else {
            return BTreeMap::new();
        };
        streams
            .iter()
            .map(|(stream, file_name)| (stream.clone(), self.dir.join(file_name)))
            .filter(|(_, path)| path.is_file())
            .collect()
    }

    /// Number of record rows (header excluded) in the log for `(stream, batch)`.
    pub fn count_records(&self, stream: &StreamName, batch: &BatchId) -> Result<u64, StorageError> {
        let path = self.log_path(stream, batch);
        if !path.exists() {
            return Ok(0);
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .at(&path)?;
        let mut count = 0;
        for record in reader.records() {
            record.at(&path)?;
            count += 1;
        }
        Ok(count)
    }

    /// Read back every record in the log for `(stream, batch)`.
    pub fn records(
        &self,
        stream: &StreamName,
        batch: &BatchId,
    ) -> Result<Vec<CorrectionRecord>, StorageError> {
        let path = self.log_path(stream, batch);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .at(&path)?;
        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.at(&path)?;
            let code = row
                .get(0)
                .and_then(|raw| raw.parse::<u32>().ok())
                .ok_or_else(|| {
                    StorageError::new(
                        &path,
                        io::Error::new(io::ErrorKind::InvalidData, "row has no label code"),
                    )
                })?;
            let text = row.get(1).unwrap_or_default();
            records.push(CorrectionRecord::new(LabelCode(code), text));
        }
        Ok(records)
    }

    fn ensure_indexed(&self, stream: &StreamName, batch: &BatchId) -> Result<(), StorageError> {
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        if index
            .get(batch)
            .is_some_and(|streams| streams.contains_key(stream))
        {
            return Ok(());
        }
        index
            .entry(*batch)
            .or_default()
            .insert(stream.clone(), log_file_name(stream, batch));
        if let Err(err) = persist_index(&self.dir.join(INDEX_FILE), &index) {
            if let Some(streams) = index.get_mut(batch) {
                streams.remove(stream);
                if streams.is_empty() {
                    index.remove(batch);
                }
            }
            return Err(err);
        }
        Ok(())
    }
}

fn load_index(path: &Path) -> Result<BatchIndex, StorageError> {
    if !path.exists() {
        return Ok(BatchIndex::new());
    }
    let bytes = fs::read(path).at(path)?;
    let file: IndexFile = serde_json::from_slice(&bytes).at(path)?;
    if file.schema_version != INDEX_SCHEMA_VERSION {
        return Err(StorageError::new(
            path,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported index schema_version {}", file.schema_version),
            ),
        ));
    }
    let mut index = BatchIndex::new();
    for (batch, streams) in file.batches {
        let batch: BatchId = batch
            .parse()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
            .at(path)?;
        let entry = index.entry(batch).or_default();
        for (stream, file_name) in streams {
            let stream = StreamName::new(stream)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
                .at(path)?;
            entry.insert(stream, file_name);
        }
    }
    Ok(index)
}

fn persist_index(path: &Path, index: &BatchIndex) -> Result<(), StorageError> {
    let file = IndexFile {
        schema_version: INDEX_SCHEMA_VERSION,
        batches: index
            .iter()
            .map(|(batch, streams)| {
                let streams = streams
                    .iter()
                    .map(|(stream, file_name)| (stream.to_string(), file_name.clone()))
                    .collect();
                (batch.to_string(), streams)
            })
            .collect(),
    };
    let text = serde_json::to_string_pretty(&file).at(path)?;
    write_atomic(path, text.as_bytes()).at(path)
}

#[cfg(test)]
#[path = "batch_log_tests.rs"]
mod tests;
