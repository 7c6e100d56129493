//! Single-writer lock files.
//!
//! A lock is a file created with `create_new`; whoever creates it owns it
//! until the guard drops. The body records the holder pid. A lock whose
//! holder is no longer running (killed before its guard dropped) is removed
//! and taken over instead of waited on.
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const RETRY_INTERVAL: Duration = Duration::from_millis(25);
/// How long a lock without a readable body counts as mid-creation.
const BODY_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize, Deserialize)]
struct LockBody {
    pid: u32,
    acquired_at_epoch_ms: u128,
}

#[derive(Debug)]
pub(crate) enum AcquireError {
    Busy { waited_ms: u64 },
    Io(io::Error),
}

/// Held lock; the file is removed on drop.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    /// Create the lock file at `path`, retrying until `wait` elapses.
    pub(crate) fn acquire(path: &Path, wait: Duration) -> Result<Self, AcquireError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(AcquireError::Io)?;
        }
        let start = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let body = LockBody {
                        pid: std::process::id(),
                        acquired_at_epoch_ms: now_epoch_ms(),
                    };
                    let text = serde_json::to_string(&body).map_err(|err| AcquireError::Io(err.into()))?;
                    if let Err(err) = file.write_all(text.as_bytes()) {
                        let _ = fs::remove_file(path);
                        return Err(AcquireError::Io(err));
                    }
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if holder_is_gone(path) {
                        match fs::remove_file(path) {
                            Ok(()) => {
                                tracing::warn!(path = %path.display(), "reclaimed lock of exited holder");
                            }
                            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                            Err(err) => return Err(AcquireError::Io(err)),
                        }
                        continue;
                    }
                    let waited = start.elapsed();
                    if waited >= wait {
                        return Err(AcquireError::Busy {
                            waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                        });
                    }
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(err) => return Err(AcquireError::Io(err)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to release lock");
        }
    }
}

/// True when the lock at `path` was left behind by a process that is gone.
///
/// A body that cannot be read or parsed is only stale once the file is
/// older than [`BODY_GRACE`]; a fresh holder may still be writing it.
fn holder_is_gone(path: &Path) -> bool {
    let body = fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<LockBody>(&bytes).ok());
    match body {
        Some(body) => !pid_is_running(body.pid),
        None => fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age >= BODY_GRACE),
    }
}

#[cfg(unix)]
fn pid_is_running(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs the existence and permission checks only;
    // nothing is delivered.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn pid_is_running(_pid: u32) -> bool {
    true
}

/// Current epoch time in milliseconds for artifact timestamps.
pub fn now_epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}
