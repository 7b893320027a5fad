//! Durable failure queue for the plexer event router.
//!
//! Failed critical deliveries are appended to a JSON-lines log on local
//! disk and retried until they succeed. The queue is guarded by an advisory
//! lockfile so multiple processes sharing a data directory cannot corrupt
//! it. The retry worker claims the whole log by renaming it to a processing
//! snapshot, bounding the lock window to the rename itself; a crash mid-
//! cycle leaves the snapshot behind for next-boot recovery.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod entry;
pub mod error;
pub mod lock;
pub mod store;

pub use entry::FailedForward;
pub use error::{QueueError, Result};
pub use lock::QueueLock;
pub use store::{FailureQueue, ProcessingClaim, LOCK_FILE, QUEUE_FILE};
