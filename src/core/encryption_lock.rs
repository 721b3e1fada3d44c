//! System-wide, try-once lock guarding the encryption step.
//!
//! Backed by an advisory `flock` on a lock file. Every acquisition opens its
//! own file description, so contention is detected between two engines of the
//! same process as well as between processes.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EncryptionLock {
    path: PathBuf,
}

/// Held while an encryption runs. Dropping it releases the lock.
pub struct EncryptionLockGuard {
    _lock: Flock<File>,
}

impl EncryptionLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attempt to take the lock without waiting.
    ///
    /// Returns `Ok(None)` when someone else holds it.
    pub fn try_acquire(&self) -> io::Result<Option<EncryptionLockGuard>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Some(EncryptionLockGuard { _lock: lock })),
            Err((_, Errno::EWOULDBLOCK)) => {
                debug!(path = %self.path.display(), "Encryption lock is held elsewhere");
                Ok(None)
            }
            Err((_, errno)) => Err(io::Error::from(errno)),
        }
    }
}
