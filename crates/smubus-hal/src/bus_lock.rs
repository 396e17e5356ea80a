//! [`BusLock`] – bounded-wait mutual exclusion over the SMU management bus.
//!
//! The bus is a single physical resource, so every command execution must be
//! bracketed by exactly one acquire and one release.  Callers should not pair
//! the two by hand; [`BusGuard::acquire`] returns a guard whose `Drop`
//! performs the release on every exit path, including unwinding.
//!
//! Two implementations are provided:
//!
//! | Type | Scope |
//! |---|---|
//! | [`ProcessBusLock`] | Threads of one process.  [`ProcessBusLock::named`] shares one lock per bus name. |
//! | [`FileBusLock`] | Every process on the machine that names the same lock file. |

use std::collections::HashMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

/// How often [`FileBusLock`] retries a contended file lock.
const FILE_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ────────────────────────────────────────────────────────────────────────────
// Trait
// ────────────────────────────────────────────────────────────────────────────

/// A mutual-exclusion primitive guarding the shared management bus.
///
/// No owner identity is tracked beyond held / not held.  No fairness is
/// guaranteed: a waiting caller is eventually granted the lock once the
/// holder releases, within its own timeout.
pub trait BusLock: Send + Sync {
    /// Try to take the lock, waiting at most `timeout`.
    ///
    /// Returns `true` when the lock was acquired and `false` when the bound
    /// elapsed first.
    fn acquire(&self, timeout: Duration) -> bool;

    /// Release a lock previously taken with [`acquire`][Self::acquire].
    ///
    /// Releasing a lock that is not held is a caller defect; implementations
    /// log it and otherwise do nothing.
    fn release(&self);
}

// ────────────────────────────────────────────────────────────────────────────
// RAII guard
// ────────────────────────────────────────────────────────────────────────────

/// Holds a [`BusLock`] for the guard's lifetime and releases it exactly once
/// on drop.
#[must_use = "the bus lock is released as soon as the guard is dropped"]
pub struct BusGuard<'a> {
    lock: &'a dyn BusLock,
}

impl<'a> BusGuard<'a> {
    /// Acquire `lock` within `timeout`.  Returns `None` on timeout, in which
    /// case nothing needs releasing.
    pub fn acquire(lock: &'a dyn BusLock, timeout: Duration) -> Option<Self> {
        if lock.acquire(timeout) {
            Some(Self { lock })
        } else {
            None
        }
    }
}

impl Drop for BusGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ProcessBusLock
// ────────────────────────────────────────────────────────────────────────────

/// In-process bus lock built on a mutex-protected flag and a condition
/// variable.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use smubus_hal::bus_lock::{BusLock, ProcessBusLock};
///
/// let lock = ProcessBusLock::new();
/// assert!(lock.acquire(Duration::from_millis(10)));
/// assert!(!lock.acquire(Duration::from_millis(10)));
/// lock.release();
/// assert!(lock.acquire(Duration::from_millis(10)));
/// ```
#[derive(Debug, Default)]
pub struct ProcessBusLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl ProcessBusLock {
    /// Create a private lock not shared with any other caller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the process-wide lock registered under `name`, creating it on
    /// first use.  Every caller naming the same bus gets the same lock.
    pub fn named(name: &str) -> Arc<Self> {
        static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<ProcessBusLock>>>> = OnceLock::new();
        let mut registry = REGISTRY
            .get_or_init(Default::default)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        registry.entry(name.to_string()).or_default().clone()
    }

    /// Whether some caller currently holds the lock.
    pub fn is_held(&self) -> bool {
        *self.flag()
    }

    // The flag is a plain bool that is always left consistent, so a poisoned
    // mutex is still safe to use.
    fn flag(&self) -> MutexGuard<'_, bool> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BusLock for ProcessBusLock {
    fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut held = self.flag();
        while *held {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            held = self
                .released
                .wait_timeout(held, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *held = true;
        true
    }

    fn release(&self) {
        let mut held = self.flag();
        if !*held {
            warn!("release called on a bus lock that is not held");
            return;
        }
        *held = false;
        drop(held);
        self.released.notify_one();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FileBusLock
// ────────────────────────────────────────────────────────────────────────────

/// System-wide bus lock backed by an exclusive advisory lock on a file.
///
/// Every process that opens the same `path` agrees on one lock.  Threads of
/// one process share a single file handle, on which the OS lock is
/// re-entrant, so an in-process gate is taken first.
#[derive(Debug)]
pub struct FileBusLock {
    path: PathBuf,
    file: File,
    gate: ProcessBusLock,
}

impl FileBusLock {
    /// Open (creating if needed) the lock file at `path`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self {
            path,
            file,
            gate: ProcessBusLock::new(),
        })
    }

    /// Default lock file shared by every smubus process on this machine.
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join("smubus-Access_PCI.lock")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BusLock for FileBusLock {
    fn acquire(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        if !self.gate.acquire(timeout) {
            return false;
        }
        loop {
            match self.file.try_lock() {
                Ok(()) => return true,
                Err(TryLockError::WouldBlock) => {}
                Err(TryLockError::Error(e)) => {
                    warn!(path = %self.path.display(), error = %e, "bus lock file could not be locked");
                    self.gate.release();
                    return false;
                }
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                self.gate.release();
                return false;
            }
            trace!(path = %self.path.display(), "bus lock file contended, retrying");
            thread::sleep(FILE_LOCK_POLL_INTERVAL.min(timeout - elapsed));
        }
    }

    fn release(&self) {
        if !self.gate.is_held() {
            warn!(path = %self.path.display(), "release called on a bus lock that is not held");
            return;
        }
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "failed to unlock bus lock file");
        }
        self.gate.release();
    }
}
