//! Single-flight execution lock per dataset.
//!
//! Two layers:
//! - an in-process set of busy dataset ids, so threads sharing a registry
//!   queue up (or fail fast) without touching the filesystem
//! - an OS advisory lock on a per-dataset lock file, so separate processes
//!   working on the same home directory exclude each other
//!
//! The advisory lock lives as long as the open file handle. The OS drops it
//! when the holder exits, even abnormally, so no staleness heuristic is needed.

use crate::config::LockSettings;
use crate::error::{Error, Result};
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek as _, SeekFrom, Write as _};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

const FILE_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct Busy {
    ids: Mutex<HashSet<Uuid>>,
    released: Condvar,
}

impl Busy {
    fn ids(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        // the set stays consistent even if a holder panicked
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, dataset_id: &Uuid) {
        self.ids().remove(dataset_id);
        self.released.notify_all();
    }
}

/// Per-dataset locks shared by every clone of a registry.
#[derive(Debug, Clone)]
pub struct DatasetLocks {
    busy: Arc<Busy>,
    settings: LockSettings,
}

impl DatasetLocks {
    pub fn new(settings: LockSettings) -> Self {
        Self {
            busy: Arc::new(Busy::default()),
            settings,
        }
    }

    /// Acquire the lock for `dataset_id`, using `lock_file` for cross-process exclusion.
    ///
    /// # Errors
    ///
    /// [`Error::LockContention`] if the dataset is busy and the policy is to
    /// fail fast, or if waiting exceeded the timeout.
    pub fn acquire(&self, dataset_id: Uuid, lock_file: &Path) -> Result<DatasetLockGuard> {
        let deadline = self
            .settings
            .wait
            .then(|| Instant::now() + self.settings.timeout());

        self.acquire_in_process(dataset_id, deadline)?;

        match acquire_file(dataset_id, lock_file, deadline) {
            Ok(file) => {
                tracing::debug!(%dataset_id, "Dataset lock acquired");
                Ok(DatasetLockGuard {
                    busy: Arc::clone(&self.busy),
                    dataset_id,
                    file,
                })
            }
            Err(e) => {
                self.busy.release(&dataset_id);
                Err(e)
            }
        }
    }

    pub fn is_locked(&self, dataset_id: &Uuid) -> bool {
        self.busy.ids().contains(dataset_id)
    }

    fn acquire_in_process(&self, dataset_id: Uuid, deadline: Option<Instant>) -> Result<()> {
        let mut ids = self.busy.ids();

        while ids.contains(&dataset_id) {
            let Some(deadline) = deadline else {
                tracing::warn!(%dataset_id, "Dataset busy, failing fast");
                return Err(Error::LockContention { dataset_id });
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(%dataset_id, "Timed out waiting for dataset lock");
                return Err(Error::LockContention { dataset_id });
            }
            ids = self
                .busy
                .released
                .wait_timeout(ids, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        ids.insert(dataset_id);
        Ok(())
    }
}

/// Open `lock_file` and take an exclusive advisory lock on it.
///
/// The file itself is never deleted; only the lock on the open handle matters.
fn acquire_file(dataset_id: Uuid, lock_file: &Path, deadline: Option<Instant>) -> Result<File> {
    if let Some(parent) = lock_file.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io_at("create lock dir", parent, e))?;
    }
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_file)
        .map_err(|e| Error::io_at("open lock", lock_file, e))?;

    loop {
        match file.try_lock_exclusive() {
            Ok(()) => break,
            Err(e) if is_contended(&e) => match deadline {
                Some(deadline) if Instant::now() < deadline => {
                    std::thread::sleep(FILE_POLL_INTERVAL);
                }
                _ => {
                    tracing::warn!(%dataset_id, "Dataset locked by another process");
                    return Err(Error::LockContention { dataset_id });
                }
            },
            Err(e) => return Err(Error::io_at("lock", lock_file, e)),
        }
    }

    // informational only
    let stamp = format!(
        "pid={} acquired={}\n",
        std::process::id(),
        chrono::Utc::now().to_rfc3339()
    );
    let written = file
        .set_len(0)
        .and_then(|()| file.seek(SeekFrom::Start(0)))
        .and_then(|_| file.write_all(stamp.as_bytes()));
    if let Err(e) = written {
        tracing::debug!(error = %e, "Could not write lock file contents");
    }

    Ok(file)
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Held for the duration of validate + execute + register. Dropping releases the lock.
#[derive(Debug)]
pub struct DatasetLockGuard {
    busy: Arc<Busy>,
    dataset_id: Uuid,
    file: File,
}

impl DatasetLockGuard {
    pub fn dataset_id(&self) -> Uuid {
        self.dataset_id
    }
}

impl Drop for DatasetLockGuard {
    fn drop(&mut self) {
        // the handle only closes after this returns, so unlock before waking
        // in-process waiters
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(dataset_id = %self.dataset_id, error = %e, "Failed to unlock dataset lock file");
        }
        self.busy.release(&self.dataset_id);
        tracing::debug!(dataset_id = %self.dataset_id, "Dataset lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fail_fast() -> LockSettings {
        LockSettings {
            wait: false,
            ..LockSettings::default()
        }
    }

    #[test]
    fn test_second_acquire_fails_fast() -> Result<()> {
        let temp = TempDir::new()?;
        let lock_file = temp.path().join(".lock");
        let locks = DatasetLocks::new(fail_fast());
        let id = Uuid::new_v4();

        let guard = locks.acquire(id, &lock_file)?;
        assert!(lock_file.exists());
        assert!(locks.is_locked(&id));

        let err = locks.acquire(id, &lock_file).expect_err("must be busy");
        assert!(err.is_retryable());

        drop(guard);
        assert!(!locks.is_locked(&id));
        let _again = locks.acquire(id, &lock_file)?;
        Ok(())
    }

    #[test]
    fn test_other_datasets_are_independent() -> Result<()> {
        let temp = TempDir::new()?;
        let locks = DatasetLocks::new(fail_fast());

        let _a = locks.acquire(Uuid::new_v4(), &temp.path().join("a.lock"))?;
        let _b = locks.acquire(Uuid::new_v4(), &temp.path().join("b.lock"))?;
        Ok(())
    }

    #[test]
    fn test_foreign_holder_blocks_until_released() -> Result<()> {
        let temp = TempDir::new()?;
        let lock_file = temp.path().join(".lock");
        let foreign = File::create(&lock_file)?;
        foreign.try_lock_exclusive()?;

        let locks = DatasetLocks::new(fail_fast());
        let id = Uuid::new_v4();
        let err = locks.acquire(id, &lock_file).expect_err("held elsewhere");
        assert_eq!(err.code(), "LOCK_CONTENTION");
        assert!(!locks.is_locked(&id), "in-process slot must be given back");

        drop(foreign);
        let _guard = locks.acquire(id, &lock_file)?;
        Ok(())
    }

    #[test]
    fn test_leftover_file_without_holder_does_not_block() -> Result<()> {
        let temp = TempDir::new()?;
        let lock_file = temp.path().join(".lock");
        fs::write(&lock_file, "pid=1 acquired=long ago")?;

        let locks = DatasetLocks::new(fail_fast());
        let _guard = locks.acquire(Uuid::new_v4(), &lock_file)?;
        assert!(fs::read_to_string(&lock_file)?.starts_with(&format!("pid={}", std::process::id())));
        Ok(())
    }

    #[test]
    fn test_independent_lock_sets_exclude_each_other() -> Result<()> {
        let temp = TempDir::new()?;
        let lock_file = temp.path().join(".lock");
        let id = Uuid::new_v4();
        // two registries stand in for two processes: no shared in-process state
        let first = DatasetLocks::new(fail_fast());
        let second = DatasetLocks::new(fail_fast());

        let guard = first.acquire(id, &lock_file)?;
        assert!(second.acquire(id, &lock_file).is_err());
        drop(guard);
        let _guard = second.acquire(id, &lock_file)?;
        Ok(())
    }

    #[test]
    fn test_waiting_acquire_gets_lock_after_release() -> Result<()> {
        let temp = TempDir::new()?;
        let lock_file = temp.path().join(".lock");
        let locks = DatasetLocks::new(LockSettings {
            wait: true,
            timeout_secs: 10,
            ..LockSettings::default()
        });
        let id = Uuid::new_v4();

        let guard = locks.acquire(id, &lock_file)?;
        let waiter = {
            let locks = locks.clone();
            let lock_file = lock_file.clone();
            std::thread::spawn(move || locks.acquire(id, &lock_file).map(|g| g.dataset_id()))
        };

        std::thread::sleep(Duration::from_millis(100));
        drop(guard);

        let acquired = waiter.join().expect("waiter thread panicked")?;
        assert_eq!(acquired, id);
        Ok(())
    }
}
