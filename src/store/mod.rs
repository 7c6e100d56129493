//! Versioned-storage collaborator contract.
//!
//! The publisher only talks to these traits. A store is the sole source of
//! truth for whether a version exists: a draft that was never finalized does
//! not exist, whatever the caller believes.
use crate::error::RemoteVersionError;
use crate::types::{DatasetVersion, VersionId};
use std::path::PathBuf;

mod local;

pub use local::{LocalDraft, LocalVersionStore};

pub trait VersionStore {
    type Draft: DraftVersion;

    /// The version readers currently see as newest, if any.
    fn latest_version(&self, collection: &str) -> Result<Option<VersionId>, RemoteVersionError>;

    /// Start a draft that will declare `parent` as its predecessor.
    fn create_version(
        &self,
        collection: &str,
        parent: Option<&VersionId>,
    ) -> Result<Self::Draft, RemoteVersionError>;
}

pub trait DraftVersion {
    fn id(&self) -> &VersionId;

    fn add_files(&mut self, paths: &[PathBuf]) -> Result<(), RemoteVersionError>;

    /// Atomically publish the draft. Readers see all of it or none of it.
    fn finalize(self) -> Result<DatasetVersion, RemoteVersionError>;
}
