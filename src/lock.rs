// src/lock.rs

//! Named cross-process locks
//!
//! Critical sections that mutate shared system state are serialized with
//! `flock(LOCK_EX)` on a per-name lock file. Two sections exist today:
//!
//! - **uid-allocation**: held across UID selection *and* `useradd`
//! - **subid-config**: held across every edit of `/etc/subuid` and `/etc/subgid`
//!
//! The lock is released when the guard drops, which covers early returns,
//! `?` propagation and unwinding panics alike. A crashed process releases
//! its flock when the kernel closes the descriptor.
//!
//! # Example
//!
//! ```ignore
//! use divban::lock::{LockManager, UID_ALLOCATION_LOCK};
//!
//! let locks = LockManager::new("/run/lock/divban");
//! let uid = locks.with_lock(UID_ALLOCATION_LOCK, || allocate_and_create())?;
//! ```

use crate::error::{Error, Result};
use fs2::FileExt;
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

static LOCK_NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").unwrap());

/// Guards UID selection plus account creation
pub const UID_ALLOCATION_LOCK: &str = "uid-allocation";

/// Guards edits of the subordinate-ID registry files
pub const SUBID_CONFIG_LOCK: &str = "subid-config";

/// An exclusive lock held for as long as this value lives
pub struct NamedLock {
    /// The lock file handle (kept open to maintain the lock)
    file: File,
    name: String,
    path: PathBuf,
}

impl NamedLock {
    /// Block until the lock file at `path` is exclusively held
    fn acquire(name: &str, path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| lock_error(name, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| lock_error(name, e))?;

        file.lock_exclusive().map_err(|e| lock_error(name, e))?;
        debug!("Acquired lock '{}' at {}", name, path.display());

        Ok(Self {
            file,
            name: name.to_string(),
            path,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NamedLock {
    fn drop(&mut self) {
        // Closing the file would release it too; unlock explicitly so the
        // release is logged at the point it happens.
        let _ = self.file.unlock();
        debug!("Released lock '{}'", self.name);
    }
}

fn lock_error(name: &str, e: std::io::Error) -> Error {
    Error::Lock {
        name: name.to_string(),
        message: e.to_string(),
    }
}

/// Hands out named locks rooted in one directory
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
}

impl LockManager {
    /// Default directory for lock files
    pub const DEFAULT_DIR: &'static str = "/run/lock/divban";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Acquire the lock called `name`, blocking while another holder has it
    pub fn acquire(&self, name: &str) -> Result<NamedLock> {
        validate_lock_name(name)?;
        NamedLock::acquire(name, self.dir.join(format!("{}.lock", name)))
    }

    /// Run `action` while holding the lock called `name`
    ///
    /// The lock is released afterwards whether `action` succeeded, failed
    /// or panicked.
    pub fn with_lock<T, F>(&self, name: &str, action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let _guard = self.acquire(name)?;
        action()
    }
}

fn validate_lock_name(name: &str) -> Result<()> {
    if LOCK_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::Lock {
            name: name.to_string(),
            message: "lock names may only contain [a-z0-9-]".to_string(),
        })
    }
}
