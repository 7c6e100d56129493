use super::{PublishOutcome, VersionPublisher};
use crate::batch_log::BatchLog;
use crate::error::{PublishError, RemoteVersionError};
use crate::label::LabelCode;
use crate::registry::{lock_slot, BatchRegistry};
use crate::store::{DraftVersion, LocalDraft, LocalVersionStore, VersionStore};
use crate::types::{BatchId, CorrectionRecord, DatasetVersion, StreamName, VersionId};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const COLLECTION: &str = "sarcasm_detector/kaggle_sarcasm";

struct Fixture {
    dir: TempDir,
    log: Arc<BatchLog>,
    registry: Arc<BatchRegistry>,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let log = Arc::new(BatchLog::open(dir.path().join("flagged")).expect("open log"));
        let registry = Arc::new(
            BatchRegistry::open(dir.path().join("state/registry.json"), log.as_ref())
                .expect("open registry"),
        );
        Self { dir, log, registry }
    }

    fn local_store(&self) -> LocalVersionStore {
        LocalVersionStore::new(self.dir.path().join("datasets"), Duration::from_millis(200))
    }

    fn publisher<S: VersionStore>(&self, store: S) -> VersionPublisher<S> {
        VersionPublisher::new(
            store,
            Arc::clone(&self.log),
            Arc::clone(&self.registry),
            COLLECTION,
        )
    }

    fn append(&self, stream: &StreamName, text: &str) -> u64 {
        self.registry
            .append_with(stream, |batch| {
                self.log.append(
                    stream,
                    batch,
                    &CorrectionRecord::new(LabelCode::SARCASTIC, text),
                )
            })
            .expect("append")
            .count
    }

    fn count(&self, stream: &StreamName) -> u64 {
        let slot = self.registry.slot(stream).expect("slot");
        let guard = lock_slot(&slot);
        guard.count()
    }
}

fn stream(name: &str) -> StreamName {
    StreamName::new(name).expect("valid stream name")
}

fn seed_root_version(store: &LocalVersionStore) -> VersionId {
    store
        .create_version(COLLECTION, None)
        .expect("create root")
        .finalize()
        .expect("finalize root")
        .id
}

/// Store double whose finalize can be told to fail; records every file set
/// it was handed.
struct FlakyStore {
    inner: LocalVersionStore,
    fail_finalize: Cell<bool>,
    attempts: Rc<RefCell<Vec<BTreeSet<PathBuf>>>>,
}

struct FlakyDraft {
    inner: LocalDraft,
    fail: bool,
    files: BTreeSet<PathBuf>,
    attempts: Rc<RefCell<Vec<BTreeSet<PathBuf>>>>,
}

impl VersionStore for FlakyStore {
    type Draft = FlakyDraft;

    fn latest_version(&self, collection: &str) -> Result<Option<VersionId>, RemoteVersionError> {
        self.inner.latest_version(collection)
    }

    fn create_version(
        &self,
        collection: &str,
        parent: Option<&VersionId>,
    ) -> Result<FlakyDraft, RemoteVersionError> {
        Ok(FlakyDraft {
            inner: self.inner.create_version(collection, parent)?,
            fail: self.fail_finalize.get(),
            files: BTreeSet::new(),
            attempts: Rc::clone(&self.attempts),
        })
    }
}

impl DraftVersion for FlakyDraft {
    fn id(&self) -> &VersionId {
        self.inner.id()
    }

    fn add_files(&mut self, paths: &[PathBuf]) -> Result<(), RemoteVersionError> {
        self.files.extend(paths.iter().cloned());
        self.inner.add_files(paths)
    }

    fn finalize(self) -> Result<DatasetVersion, RemoteVersionError> {
        self.attempts.borrow_mut().push(self.files.clone());
        if self.fail {
            return Err(RemoteVersionError::Rejected("upload interrupted".to_string()));
        }
        self.inner.finalize()
    }
}

#[test]
fn empty_batch_is_a_noop() {
    let fx = Fixture::new();
    let store = fx.local_store();
    let transformer = stream("transformer");
    let batch = fx.registry.current_batch(&transformer).expect("current");
    let publisher = fx.publisher(store.clone());

    let outcome = publisher.publish(&batch).expect("publish");
    assert!(matches!(outcome, PublishOutcome::NoOp));
    assert_eq!(fx.registry.current_batch(&transformer).expect("current"), batch);
    assert_eq!(store.latest_version(COLLECTION).expect("latest"), None);
}

#[test]
fn successful_publish_chains_to_latest_and_rotates() {
    let fx = Fixture::new();
    let store = fx.local_store();
    let root = seed_root_version(&store);
    let transformer = stream("transformer");
    fx.append(&transformer, "what a lovely traffic jam");
    fx.append(&transformer, "the weather is nice");
    let batch = fx.registry.current_batch(&transformer).expect("current");
    let log_path = fx.log.log_path(&transformer, &batch);
    let before = std::fs::read(&log_path).expect("read log");

    let publisher = fx.publisher(store.clone());
    let PublishOutcome::Published {
        version, rotations, ..
    } = publisher.publish(&batch).expect("publish")
    else {
        panic!("expected a published version");
    };

    assert_eq!(version.parent_id.as_ref(), Some(&root));
    assert_eq!(store.latest_version(COLLECTION).expect("latest"), Some(version.id.clone()));
    let expected_name = PathBuf::from(log_path.file_name().expect("file name"));
    assert_eq!(version.files, BTreeSet::from([expected_name.clone()]));

    assert_eq!(rotations.len(), 1);
    assert_eq!(rotations[0].retired, batch);
    assert_eq!(rotations[0].records, 2);
    let current = fx.registry.current_batch(&transformer).expect("current");
    assert_ne!(current, batch);
    assert_eq!(rotations[0].current, current);
    assert_eq!(fx.count(&transformer), 0);

    assert_eq!(std::fs::read(&log_path).expect("reread log"), before);
    let packaged = store.files_dir(COLLECTION, &version.id).join(expected_name);
    assert_eq!(std::fs::read(packaged).expect("read packaged"), before);
}

#[test]
fn republishing_a_retired_batch_is_a_noop() {
    let fx = Fixture::new();
    let store = fx.local_store();
    let transformer = stream("transformer");
    fx.append(&transformer, "x");
    let batch = fx.registry.current_batch(&transformer).expect("current");
    let publisher = fx.publisher(store.clone());

    assert!(matches!(
        publisher.publish(&batch).expect("first publish"),
        PublishOutcome::Published { .. }
    ));
    assert!(matches!(
        publisher.publish(&batch).expect("second publish"),
        PublishOutcome::NoOp
    ));
    assert_eq!(store.lineage(COLLECTION).expect("lineage").len(), 1);
}

#[test]
fn failed_finalize_leaves_batch_open_and_retry_sees_same_files() {
    let fx = Fixture::new();
    let store = FlakyStore {
        inner: fx.local_store(),
        fail_finalize: Cell::new(true),
        attempts: Rc::new(RefCell::new(Vec::new())),
    };
    let transformer = stream("transformer");
    fx.append(&transformer, "a");
    fx.append(&transformer, "b");
    let batch = fx.registry.current_batch(&transformer).expect("current");
    let publisher = fx.publisher(store);

    let err = publisher.publish(&batch).expect_err("finalize fails");
    assert!(matches!(err, PublishError::Remote(RemoteVersionError::Rejected(_))));
    assert_eq!(fx.registry.current_batch(&transformer).expect("current"), batch);
    assert_eq!(fx.count(&transformer), 2);
    assert_eq!(
        publisher.store().latest_version(COLLECTION).expect("latest"),
        None
    );

    publisher.store().fail_finalize.set(false);
    let outcome = publisher.publish(&batch).expect("retry");
    assert!(matches!(outcome, PublishOutcome::Published { .. }));

    let attempts = publisher.store().attempts.borrow();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0], attempts[1]);
    assert_ne!(fx.registry.current_batch(&transformer).expect("current"), batch);
}

#[test]
fn streams_package_together_into_one_version() {
    let fx = Fixture::new();
    let store = fx.local_store();
    let transformer = stream("transformer");
    let logistic = stream("logistic");
    let idle = stream("idle");
    fx.append(&transformer, "t1");
    fx.append(&logistic, "l1");
    fx.append(&logistic, "l2");
    let idle_batch = fx.registry.current_batch(&idle).expect("idle batch");

    let publisher = fx.publisher(store.clone());
    let outcome = publisher
        .publish_current(&[transformer.clone(), logistic.clone(), idle.clone()])
        .expect("publish");
    let PublishOutcome::Published {
        version, rotations, ..
    } = outcome
    else {
        panic!("expected a published version");
    };
    assert_eq!(version.files.len(), 2);
    let rotated: Vec<_> = rotations.iter().map(|r| r.stream.clone()).collect();
    assert_eq!(rotated, vec![logistic.clone(), transformer.clone()]);
    assert_eq!(fx.count(&logistic), 0);
    assert_eq!(
        fx.registry.current_batch(&idle).expect("idle batch"),
        idle_batch
    );

    fx.append(&logistic, "l3");
    let PublishOutcome::Published { version: next, .. } = publisher
        .publish_current(&[transformer, logistic])
        .expect("publish again")
    else {
        panic!("expected a second version");
    };
    assert_eq!(next.parent_id, Some(version.id));
    assert_eq!(next.files.len(), 1);
}

#[test]
fn appends_racing_a_publish_are_never_lost() {
    let fx = Fixture::new();
    let store = fx.local_store();
    let transformer = stream("transformer");
    fx.append(&transformer, "seed");
    let first_batch = fx.registry.current_batch(&transformer).expect("current");
    let publisher = fx.publisher(store.clone());

    let outcome = std::thread::scope(|scope| {
        let appender = scope.spawn(|| {
            for idx in 0..40 {
                fx.append(&transformer, &format!("row {idx}"));
            }
        });
        let outcome = publisher.publish(&first_batch).expect("publish");
        appender.join().expect("join appender");
        outcome
    });

    let PublishOutcome::Published { version, .. } = outcome else {
        panic!("expected a published version");
    };
    let retired_rows = fx
        .log
        .count_records(&transformer, &first_batch)
        .expect("retired rows");
    let current = fx.registry.current_batch(&transformer).expect("current");
    let open_rows = fx.log.count_records(&transformer, &current).expect("open rows");
    assert_eq!(retired_rows + open_rows, 41);
    assert_eq!(fx.count(&transformer), open_rows);

    let name = fx
        .log
        .log_path(&transformer, &first_batch)
        .file_name()
        .map(PathBuf::from)
        .expect("file name");
    let packaged = std::fs::read(store.files_dir(COLLECTION, &version.id).join(name))
        .expect("read packaged");
    let retired = std::fs::read(fx.log.log_path(&transformer, &first_batch)).expect("read retired");
    assert_eq!(packaged, retired);
}

#[test]
fn unknown_batch_is_a_noop() {
    let fx = Fixture::new();
    let publisher = fx.publisher(fx.local_store());
    assert!(matches!(
        publisher.publish(&BatchId::mint()).expect("publish"),
        PublishOutcome::NoOp
    ));
}

#[test]
fn repeated_streams_and_batches_package_once() {
    let fx = Fixture::new();
    let store = fx.local_store();
    let transformer = stream("transformer");
    fx.append(&transformer, "a");
    let publisher = fx.publisher(store.clone());

    let PublishOutcome::Published {
        version, rotations, ..
    } = publisher
        .publish_current(&[transformer.clone(), transformer.clone()])
        .expect("publish")
    else {
        panic!("expected a published version");
    };
    assert_eq!(version.files.len(), 1);
    assert_eq!(rotations.len(), 1);

    fx.append(&transformer, "b");
    let batch = fx.registry.current_batch(&transformer).expect("current");
    let PublishOutcome::Published {
        version: next,
        rotations,
        ..
    } = publisher.publish_batches(&[batch, batch]).expect("publish batches")
    else {
        panic!("expected a second version");
    };
    assert_eq!(next.files.len(), 1);
    assert_eq!(rotations.len(), 1);
    assert_eq!(store.lineage(COLLECTION).expect("lineage").len(), 2);
}

#[test]
fn failed_rotation_still_reports_the_published_version() {
    let fx = Fixture::new();
    let store = fx.local_store();
    let transformer = stream("transformer");
    fx.append(&transformer, "a");
    let batch = fx.registry.current_batch(&transformer).expect("current");

    // A directory in place of registry.json makes the rename in persist fail.
    let state = fx.dir.path().join("state/registry.json");
    std::fs::remove_file(&state).expect("remove registry");
    std::fs::create_dir_all(state.join("blocker")).expect("block registry");

    let publisher = fx.publisher(store.clone());
    let PublishOutcome::Published {
        version,
        rotations,
        unrotated,
    } = publisher.publish(&batch).expect("publish")
    else {
        panic!("expected a published version");
    };
    assert!(rotations.is_empty());
    assert_eq!(unrotated.len(), 1);
    assert_eq!(unrotated[0].stream, transformer);
    assert_eq!(unrotated[0].batch, batch);
    assert_eq!(store.latest_version(COLLECTION).expect("latest"), Some(version.id.clone()));
    assert_eq!(fx.registry.current_batch(&transformer).expect("current"), batch);
    assert_eq!(fx.count(&transformer), 1);

    std::fs::remove_dir_all(&state).expect("unblock registry");
    let PublishOutcome::Published {
        version: retry,
        unrotated,
        ..
    } = publisher.publish(&batch).expect("retry")
    else {
        panic!("expected the batch to package again");
    };
    assert!(unrotated.is_empty());
    assert_eq!(retry.parent_id, Some(version.id));
    assert_ne!(fx.registry.current_batch(&transformer).expect("current"), batch);
}
