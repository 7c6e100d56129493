//! Directory-backed version store.
//!
//! ```text
//! <root>/<collection>/
//!   LATEST                      id of the newest finalized version
//!   .lock                       held while a draft finalizes
//!   staging/<id>/files/...      drafts in progress
//!   versions/<id>/manifest.json
//!   versions/<id>/files/...
//! ```
//!
//! Finalize is a compare-and-swap on `LATEST`: a draft whose parent is no
//! longer the latest version is refused, so two publishers can never both
//! chain onto the same parent.
use super::{DraftVersion, VersionStore};
use crate::error::RemoteVersionError;
use crate::lock::{now_epoch_ms, AcquireError, WriterLock};
use crate::paths::write_atomic;
use crate::types::{DatasetVersion, VersionId};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

const LATEST_FILE: &str = "LATEST";
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone)]
pub struct LocalVersionStore {
    root: PathBuf,
    lock_wait: Duration,
}

impl LocalVersionStore {
    pub fn new(root: impl Into<PathBuf>, lock_wait: Duration) -> Self {
        Self {
            root: root.into(),
            lock_wait,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the files of a finalized version.
    pub fn files_dir(&self, collection: &str, id: &VersionId) -> PathBuf {
        self.collection_dir(collection)
            .join("versions")
            .join(id.as_str())
            .join("files")
    }

    /// Read one finalized version's manifest.
    pub fn version(
        &self,
        collection: &str,
        id: &VersionId,
    ) -> Result<DatasetVersion, RemoteVersionError> {
        validate_collection(collection)?;
        let path = self.manifest_path(collection, id);
        let bytes = fs::read(&path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                RemoteVersionError::MissingParent(id.clone())
            } else {
                RemoteVersionError::io(&path, err)
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|err| RemoteVersionError::Corrupt {
            path,
            detail: err.to_string(),
        })
    }

    /// Versions from newest to the chain root.
    pub fn lineage(&self, collection: &str) -> Result<Vec<DatasetVersion>, RemoteVersionError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = self.latest_version(collection)?;
        while let Some(id) = next {
            if !seen.insert(id.clone()) {
                return Err(RemoteVersionError::Corrupt {
                    path: self.manifest_path(collection, &id),
                    detail: format!("lineage cycle through {id}"),
                });
            }
            let version = self.version(collection, &id)?;
            next = version.parent_id.clone();
            chain.push(version);
        }
        Ok(chain)
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(collection)
    }

    fn manifest_path(&self, collection: &str, id: &VersionId) -> PathBuf {
        self.collection_dir(collection)
            .join("versions")
            .join(id.as_str())
            .join(MANIFEST_FILE)
    }
}

impl VersionStore for LocalVersionStore {
    type Draft = LocalDraft;

    fn latest_version(&self, collection: &str) -> Result<Option<VersionId>, RemoteVersionError> {
        validate_collection(collection)?;
        read_latest(&self.collection_dir(collection).join(LATEST_FILE))
    }

    fn create_version(
        &self,
        collection: &str,
        parent: Option<&VersionId>,
    ) -> Result<LocalDraft, RemoteVersionError> {
        validate_collection(collection)?;
        if let Some(parent) = parent {
            if !self.manifest_path(collection, parent).is_file() {
                return Err(RemoteVersionError::MissingParent(parent.clone()));
            }
        }
        let id = VersionId::new(Uuid::new_v4().simple().to_string());
        let collection_dir = self.collection_dir(collection);
        let staging_dir = collection_dir.join("staging").join(id.as_str());
        let files_dir = staging_dir.join("files");
        fs::create_dir_all(&files_dir).map_err(|err| RemoteVersionError::io(&files_dir, err))?;
        tracing::debug!(collection, version = %id, parent = ?parent, "draft version created");
        Ok(LocalDraft {
            collection: collection.to_string(),
            collection_dir,
            staging_dir,
            id,
            parent: parent.cloned(),
            files: BTreeSet::new(),
            lock_wait: self.lock_wait,
            finalized: false,
        })
    }
}

/// Draft in `staging/`; removed again if dropped without finalizing.
#[derive(Debug)]
pub struct LocalDraft {
    collection: String,
    collection_dir: PathBuf,
    staging_dir: PathBuf,
    id: VersionId,
    parent: Option<VersionId>,
    files: BTreeSet<PathBuf>,
    lock_wait: Duration,
    finalized: bool,
}

impl DraftVersion for LocalDraft {
    fn id(&self) -> &VersionId {
        &self.id
    }

    fn add_files(&mut self, paths: &[PathBuf]) -> Result<(), RemoteVersionError> {
        for source in paths {
            let name = source
                .file_name()
                .map(PathBuf::from)
                .ok_or_else(|| {
                    RemoteVersionError::Rejected(format!("{} has no file name", source.display()))
                })?;
            if self.files.contains(&name) {
                return Err(RemoteVersionError::Rejected(format!(
                    "duplicate file name {} in draft {}",
                    name.display(),
                    self.id
                )));
            }
            let dest = self.staging_dir.join("files").join(&name);
            fs::copy(source, &dest).map_err(|err| RemoteVersionError::io(source, err))?;
            self.files.insert(name);
        }
        Ok(())
    }

    fn finalize(mut self) -> Result<DatasetVersion, RemoteVersionError> {
        let lock_path = self.collection_dir.join(".lock");
        let _lock = WriterLock::acquire(&lock_path, self.lock_wait).map_err(|err| match err {
            AcquireError::Busy { waited_ms } => RemoteVersionError::Timeout {
                collection: self.collection.clone(),
                waited_ms,
            },
            AcquireError::Io(err) => RemoteVersionError::io(&lock_path, err),
        })?;

        let latest_path = self.collection_dir.join(LATEST_FILE);
        let latest = read_latest(&latest_path)?;
        if latest != self.parent {
            return Err(RemoteVersionError::LineageConflict {
                collection: self.collection.clone(),
                expected: self.parent.clone(),
                actual: latest,
            });
        }

        let version = DatasetVersion {
            id: self.id.clone(),
            collection: self.collection.clone(),
            parent_id: self.parent.clone(),
            files: self.files.clone(),
            created_at_epoch_ms: now_epoch_ms(),
        };
        let manifest_path = self.staging_dir.join(MANIFEST_FILE);
        let text = serde_json::to_string_pretty(&version)
            .map_err(|err| RemoteVersionError::io(&manifest_path, err))?;
        fs::write(&manifest_path, text.as_bytes())
            .map_err(|err| RemoteVersionError::io(&manifest_path, err))?;

        let versions_dir = self.collection_dir.join("versions");
        fs::create_dir_all(&versions_dir).map_err(|err| RemoteVersionError::io(&versions_dir, err))?;
        let final_dir = versions_dir.join(self.id.as_str());
        fs::rename(&self.staging_dir, &final_dir)
            .map_err(|err| RemoteVersionError::io(&final_dir, err))?;
        // From here the version directory exists; LATEST decides visibility.
        self.finalized = true;
        if let Err(err) = write_atomic(&latest_path, format!("{}\n", self.id).as_bytes()) {
            let _ = fs::remove_dir_all(&final_dir);
            return Err(RemoteVersionError::io(&latest_path, err));
        }
        tracing::info!(
            collection = %self.collection,
            version = %self.id,
            parent = ?self.parent,
            files = self.files.len(),
            "version finalized"
        );
        Ok(version)
    }
}

impl Drop for LocalDraft {
    fn drop(&mut self) {
        if !self.finalized && self.staging_dir.exists() {
            let _ = fs::remove_dir_all(&self.staging_dir);
        }
    }
}

fn read_latest(path: &Path) -> Result<Option<VersionId>, RemoteVersionError> {
    match fs::read_to_string(path) {
        Ok(text) => {
            let id = text.trim();
            if id.is_empty() {
                return Err(RemoteVersionError::Corrupt {
                    path: path.to_path_buf(),
                    detail: "empty latest pointer".to_string(),
                });
            }
            Ok(Some(VersionId::new(id)))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(RemoteVersionError::io(path, err)),
    }
}

fn validate_collection(collection: &str) -> Result<(), RemoteVersionError> {
    let path = Path::new(collection);
    let valid = !collection.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if !valid {
        return Err(RemoteVersionError::Rejected(format!(
            "collection must be a relative path without '..' (got {collection:?})"
        )));
    }
    Ok(())
}
