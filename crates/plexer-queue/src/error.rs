//! Error types for failure-queue operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Failure modes of the on-disk queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Filesystem operation failed.
    #[error("queue io error at {path}: {source}")]
    Io {
        /// Path the operation touched.
        path: PathBuf,
        /// Underlying io error.
        #[source]
        source: std::io::Error,
    },

    /// The advisory lock could not be acquired within the retry budget.
    #[error("queue lock unavailable at {path} after {attempts} attempts")]
    LockUnavailable {
        /// Lockfile path.
        path: PathBuf,
        /// Number of acquisition attempts made.
        attempts: u32,
    },

    /// Entry serialization failed.
    #[error("queue entry serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// An entry failed schema validation before persistence.
    #[error("invalid queue entry: {reason}")]
    InvalidEntry {
        /// What the entry is missing.
        reason: String,
    },
}

impl QueueError {
    /// Creates an io error tagged with the path it touched.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Creates an invalid-entry error.
    pub fn invalid_entry(reason: impl Into<String>) -> Self {
        Self::InvalidEntry { reason: reason.into() }
    }
}
