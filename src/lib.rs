//! Capture flagged model verdicts as labeled rows and package them into
//! lineage-linked dataset versions.
//!
//! Each stream (one per model being corrected) appends to a CSV log for its
//! current batch. Packaging hands the batch files to a [`VersionStore`] as a
//! new version whose parent is the previous latest, then rotates every
//! packaged stream onto a fresh batch.
pub mod batch_log;
pub mod config;
pub mod error;
pub mod inference;
pub mod label;
pub mod lock;
pub mod paths;
pub mod publisher;
pub mod registry;
pub mod store;
pub mod types;
pub mod workspace;

pub use batch_log::BatchLog;
pub use config::Config;
pub use error::{Error, PublishError, RemoteVersionError, Result, StorageError};
pub use label::{LabelCode, LabelParser, LabelTable, Verdict};
pub use publisher::{PublishOutcome, Rotation, RotationFailure, VersionPublisher};
pub use registry::BatchRegistry;
pub use store::{DraftVersion, LocalVersionStore, VersionStore};
pub use types::{BatchId, CorrectionRecord, DatasetVersion, StreamName, VersionId};
pub use workspace::{Submission, Workspace};
