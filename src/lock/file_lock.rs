//! File Lock Module
//!
//! Non-reentrant mutual exclusion keyed by a sentinel file path.
//!
//! Threads of one process queue on an internal condition variable so only a
//! single thread at a time polls the filesystem. The filesystem is the arbiter
//! between processes: whoever manages to exclusively create (or, on Windows,
//! exclusively open) the sentinel owns the lock until it closes and deletes it.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::config::DEFAULT_LOCK_RETRY_MS;
use crate::error::{CacheError, Result};

#[cfg(windows)]
const ERROR_SHARING_VIOLATION: i32 = 32;
#[cfg(windows)]
const ERROR_LOCK_VIOLATION: i32 = 33;

// == Lock State ==
#[derive(Debug, Default)]
struct LockState {
    /// A thread of this process owns the lock (or is polling for it)
    held: bool,
    /// Open sentinel handle while owned
    handle: Option<File>,
}

// == File Lock ==
/// Mutual exclusion between threads and processes through a sentinel file.
///
/// The lock is not reentrant: a thread calling [`FileLock::acquire`] while
/// already holding a guard from the same lock deadlocks.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    retry_interval: Duration,
    state: Mutex<LockState>,
    available: Condvar,
}

impl FileLock {
    // == Constructor ==
    /// Creates a lock on `path` with the default retry interval.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_retry_interval(path, Duration::from_millis(DEFAULT_LOCK_RETRY_MS))
    }

    /// Creates a lock on `path` polling every `retry_interval` under contention.
    pub fn with_retry_interval(path: impl Into<PathBuf>, retry_interval: Duration) -> Self {
        Self {
            path: path.into(),
            retry_interval,
            state: Mutex::new(LockState::default()),
            available: Condvar::new(),
        }
    }

    /// Sentinel file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true while a thread of this process owns or is claiming the lock.
    pub fn is_held(&self) -> bool {
        self.state.lock().held
    }

    // == Acquire ==
    /// Blocks until this thread owns the lock.
    ///
    /// Contention with another process is retried forever at a fixed interval.
    /// Any other I/O failure is returned immediately as [`CacheError::Lock`].
    pub fn acquire(&self) -> Result<FileLockGuard<'_>> {
        {
            let mut state = self.state.lock();
            while state.held {
                self.available.wait(&mut state);
            }
            state.held = true;
        }

        match self.open_sentinel() {
            Ok(file) => {
                self.state.lock().handle = Some(file);
                Ok(FileLockGuard { lock: self })
            }
            Err(err) => {
                self.state.lock().held = false;
                self.available.notify_one();
                Err(CacheError::lock(&self.path, err))
            }
        }
    }

    fn open_sentinel(&self) -> io::Result<File> {
        let mut attempts: u64 = 0;
        loop {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)?;
                }
            }

            match open_exclusive(&self.path) {
                Ok(file) => {
                    if attempts > 0 {
                        debug!(
                            "Acquired lock {} after {} retries",
                            self.path.display(),
                            attempts
                        );
                    }
                    return Ok(file);
                }
                Err(err) if is_contention(&err) => {
                    if attempts == 0 {
                        debug!("Lock {} is busy, waiting", self.path.display());
                    }
                    attempts += 1;
                    thread::sleep(self.retry_interval);
                }
                Err(err) => return Err(err),
            }
        }
    }

    // == Release ==
    /// Gives up ownership: closes and deletes the sentinel, then wakes one waiter.
    ///
    /// # Panics
    /// Panics if the lock is not held.
    pub(crate) fn release(&self) {
        let handle = {
            let mut state = self.state.lock();
            assert!(
                state.held,
                "released file lock {} that is not held",
                self.path.display()
            );
            state.handle.take()
        };

        drop(handle);
        if let Err(err) = fs::remove_file(&self.path) {
            // Another process may already have recreated it
            trace!("Could not delete lock {}: {}", self.path.display(), err);
        }

        self.state.lock().held = false;
        self.available.notify_one();
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Only reachable with a held lock if a guard was leaked
        let state = self.state.get_mut();
        if state.handle.take().is_some() {
            let _ = fs::remove_file(&self.path);
        }
        state.held = false;
    }
}

// == File Lock Guard ==
/// Scoped ownership of a [`FileLock`]; dropping it releases the lock.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct FileLockGuard<'a> {
    lock: &'a FileLock,
}

impl FileLockGuard<'_> {
    /// Releases the lock now rather than at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for FileLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

// == Platform Helpers ==
#[cfg(not(windows))]
fn open_exclusive(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(windows)]
fn open_exclusive(path: &Path) -> io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;

    OpenOptions::new()
        .write(true)
        .create(true)
        .share_mode(0)
        .open(path)
}

/// Errors meaning "somebody else has the sentinel right now".
fn is_contention(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::AlreadyExists {
        return true;
    }

    #[cfg(windows)]
    {
        if let Some(code) = err.raw_os_error() {
            return code == ERROR_SHARING_VIOLATION || code == ERROR_LOCK_VIOLATION;
        }
    }

    false
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_creates_and_release_deletes_sentinel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin.lock");
        let lock = FileLock::new(&path);

        let guard = lock.acquire().unwrap();
        assert!(path.exists());
        assert!(lock.is_held());

        guard.release();
        assert!(!path.exists());
        assert!(!lock.is_held());
    }

    #[test]
    fn test_acquire_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("data.lock");
        let lock = FileLock::new(&path);

        let _guard = lock.acquire().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_lock_can_be_reacquired() {
        let dir = TempDir::new().unwrap();
        let lock = FileLock::new(dir.path().join("again.lock"));

        for _ in 0..10 {
            let _guard = lock.acquire().unwrap();
        }
        assert!(!lock.is_held());
    }

    #[test]
    #[should_panic(expected = "not held")]
    fn test_release_without_acquire_panics() {
        let dir = TempDir::new().unwrap();
        let lock = FileLock::new(dir.path().join("unheld.lock"));
        lock.release();
    }

    #[test]
    fn test_non_contention_error_is_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"file").unwrap();
        let lock = FileLock::new(blocker.join("sub").join("x.lock"));

        let result = lock.acquire();
        assert!(matches!(result, Err(CacheError::Lock { .. })));
        // A failed attempt must not leave the lock claimed
        assert!(!lock.is_held());
    }

    #[test]
    fn test_waiter_is_woken_on_release() {
        let dir = TempDir::new().unwrap();
        let lock = Arc::new(FileLock::new(dir.path().join("wake.lock")));
        let acquired = Arc::new(AtomicBool::new(false));

        let guard = lock.acquire().unwrap();

        let waiter = {
            let lock = lock.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                let _guard = lock.acquire().unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst), "waiter ran while lock held");

        drop(guard);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stale_sentinel_from_other_owner_blocks_until_removed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foreign.lock");
        let other = FileLock::with_retry_interval(&path, Duration::from_millis(5));
        let lock = Arc::new(FileLock::with_retry_interval(&path, Duration::from_millis(5)));

        let foreign = other.acquire().unwrap();

        let contender = {
            let lock = lock.clone();
            thread::spawn(move || {
                let _guard = lock.acquire().unwrap();
            })
        };

        thread::sleep(Duration::from_millis(40));
        assert!(!contender.is_finished());

        drop(foreign);
        contender.join().unwrap();
    }

    #[test]
    fn test_dropping_lock_cleans_up_leaked_guard() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("leak.lock");
        let lock = FileLock::new(&path);

        std::mem::forget(lock.acquire().unwrap());
        assert!(path.exists());

        drop(lock);
        assert!(!path.exists());
    }
}
