//! Advisory lock files guarding writes to shared state on disk.
//!
//! `fs2` provides the cross-platform exclusive lock. The lock file is
//! created on acquisition and removed when the [`LockGuard`] drops.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;

use crate::errors::{CloudError, Result};

const RETRY_DELAY: Duration = Duration::from_millis(50);

/// An advisory lock at a fixed path.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

/// Holds the exclusive lock until dropped.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock or fail immediately with [`CloudError::LockConflict`].
    pub fn acquire(&self) -> Result<LockGuard> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)?;

        file.try_lock_exclusive().map_err(|_| CloudError::LockConflict {
            path: self.path.clone(),
        })?;

        Ok(LockGuard {
            file,
            path: self.path.clone(),
        })
    }

    /// Retry [`Self::acquire`] until it succeeds or `timeout` elapses.
    pub async fn wait(&self, timeout: Duration) -> Result<LockGuard> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.acquire() {
                Err(CloudError::LockConflict { .. }) if tokio::time::Instant::now() < deadline => {
                    tracing::debug!(path = %self.path.display(), "Lock busy, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                other => return other,
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        let _ = std::fs::remove_file(&self.path);
    }
}
