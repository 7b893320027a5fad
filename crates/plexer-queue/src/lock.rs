//! Advisory lockfile guarding the failure queue.
//!
//! The lock is acquired by atomically creating the lockfile (create-new
//! semantics) and released by unlinking it, which is exclusive across every
//! process sharing the data directory. Acquisition retries a bounded number
//! of times; a lockfile older than the staleness bound is treated as the
//! residue of a crashed holder and reclaimed.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::fs;
use tracing::warn;

use crate::error::{QueueError, Result};

/// Maximum acquisition attempts before giving up.
const LOCK_RETRIES: u32 = 50;

/// Pause between acquisition attempts.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Age beyond which a lockfile is considered abandoned. Far beyond any
/// legitimate critical section (a rename plus an append).
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

/// RAII guard over the queue lockfile.
///
/// Dropping the guard removes the lockfile best-effort; prefer
/// [`QueueLock::release`] so removal failures surface.
#[derive(Debug)]
pub struct QueueLock {
    path: PathBuf,
    released: bool,
}

impl QueueLock {
    /// Acquires the lock, retrying with the default budget.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LockUnavailable`] when the retry budget is
    /// exhausted, or [`QueueError::Io`] on filesystem failure.
    pub async fn acquire(path: &Path) -> Result<Self> {
        Self::acquire_with(path, LOCK_RETRIES, LOCK_RETRY_DELAY, LOCK_STALE_AFTER).await
    }

    pub(crate) async fn acquire_with(
        path: &Path,
        retries: u32,
        retry_delay: Duration,
        stale_after: Duration,
    ) -> Result<Self> {
        for attempt in 0..retries {
            match fs::OpenOptions::new().write(true).create_new(true).open(path).await {
                Ok(_) => return Ok(Self { path: path.to_path_buf(), released: false }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(path, stale_after).await {
                        warn!(path = %path.display(), "breaking stale queue lock");
                        let _ = fs::remove_file(path).await;
                        continue;
                    }
                    if attempt + 1 < retries {
                        tokio::time::sleep(retry_delay).await;
                    }
                },
                Err(e) => return Err(QueueError::io(path, e)),
            }
        }
        Err(QueueError::LockUnavailable { path: path.to_path_buf(), attempts: retries })
    }

    /// Releases the lock by unlinking the lockfile.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Io`] when the lockfile cannot be removed.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        fs::remove_file(&self.path).await.map_err(|e| QueueError::io(&self.path, e))
    }
}

impl Drop for QueueLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Whether an existing lockfile has outlived the staleness bound.
async fn lock_is_stale(path: &Path, stale_after: Duration) -> bool {
    let Ok(metadata) = fs::metadata(path).await else {
        // Holder released between our create attempt and this check.
        return false;
    };
    match metadata.modified().map(|modified| modified.elapsed()) {
        Ok(Ok(age)) => age >= stale_after,
        _ => false,
    }
}
