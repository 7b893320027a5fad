//! The on-disk failure queue.
//!
//! Layout inside the data directory:
//! - `failed_forwards.jsonl` - the durable queue, append-only, one entry
//!   per newline-terminated line.
//! - `failed_forwards.lock` - advisory lockfile; every read and write of
//!   the queue file happens under it.
//! - `processing.<uuid>.jsonl` - snapshot claimed by one retry cycle.
//! - `snapshot.<uuid>.jsonl` - short-lived copy used by the metrics scan.
//!
//! The rename-and-drain protocol: a retry cycle renames the queue to a
//! processing file and creates a fresh empty queue under the lock, then
//! releases it so new failures append without blocking. Survivors are
//! appended back and the processing file unlinked under a second lock hold;
//! if the append fails the processing file stays behind and next-boot
//! recovery reattaches it.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use plexer_core::{Clock, DeliveryMetrics, Envelope, QueueScan};
use tokio::{
    fs,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    entry::FailedForward,
    error::{QueueError, Result},
    lock::QueueLock,
};

/// File name of the durable queue.
pub const QUEUE_FILE: &str = "failed_forwards.jsonl";

/// File name of the advisory lockfile.
pub const LOCK_FILE: &str = "failed_forwards.lock";

const PROCESSING_PREFIX: &str = "processing.";
const SNAPSHOT_PREFIX: &str = "snapshot.";
const JSONL_SUFFIX: &str = ".jsonl";

/// Handle to the failure queue in one data directory.
pub struct FailureQueue {
    data_dir: PathBuf,
    metrics: DeliveryMetrics,
    clock: Arc<dyn Clock>,
}

/// A processing file claimed from the queue by one retry cycle.
///
/// The claim only names the file; unlinking happens in
/// [`FailureQueue::finish_cycle`] after survivors are durable.
#[derive(Debug)]
pub struct ProcessingClaim {
    path: PathBuf,
}

impl ProcessingClaim {
    /// Path of the claimed processing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FailureQueue {
    /// Creates a queue handle rooted at `data_dir`.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        metrics: DeliveryMetrics,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { data_dir: data_dir.into(), metrics, clock }
    }

    /// The data directory this queue lives in.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the durable queue file.
    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join(QUEUE_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.data_dir.join(LOCK_FILE)
    }

    /// The metrics handle this queue updates.
    pub fn metrics(&self) -> &DeliveryMetrics {
        &self.metrics
    }

    /// Ensures the data directory and the queue file exist.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Io`] on filesystem failure.
    pub async fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| QueueError::io(&self.data_dir, e))?;
        let queue = self.queue_path();
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&queue)
            .await
            .map_err(|e| QueueError::io(&queue, e))?;
        Ok(())
    }

    /// Persists a first-attempt failure.
    ///
    /// Builds the entry with its initial retry schedule, validates it,
    /// appends one JSON line under the lock, and bumps the counters.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`QueueError`]; the caller decides whether to
    /// drop the event (ingress-path failures must never block).
    pub async fn save_failed_event(
        &self,
        event: &Envelope,
        consumer_key: &str,
        error: &str,
    ) -> Result<()> {
        let entry = FailedForward::new(event.clone(), consumer_key, error, self.clock.now_utc());
        entry.validate()?;

        self.append_under_lock(std::slice::from_ref(&entry)).await?;
        self.metrics.record_enqueued(error, entry.next_attempt);
        Ok(())
    }

    /// Claims the current queue contents for one retry cycle.
    ///
    /// Under the lock: an absent or empty queue zeroes the counters and
    /// yields `None`; otherwise the queue is renamed to
    /// `processing.<uuid>.jsonl`, a fresh empty queue file is created so
    /// concurrent appends never observe a missing file, and the claim is
    /// returned. The lock is held only for the rename and re-creation.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] on lock or filesystem failure.
    pub async fn claim_batch(&self) -> Result<Option<ProcessingClaim>> {
        self.ensure_layout().await?;
        let lock = QueueLock::acquire(&self.lock_path()).await?;
        let outcome = self.claim_locked().await;
        lock.release().await?;
        outcome
    }

    async fn claim_locked(&self) -> Result<Option<ProcessingClaim>> {
        let queue = self.queue_path();
        let size = match fs::metadata(&queue).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(QueueError::io(&queue, e)),
        };
        if size == 0 {
            self.metrics.reset_counts();
            return Ok(None);
        }

        let processing =
            self.data_dir.join(format!("{PROCESSING_PREFIX}{}{JSONL_SUFFIX}", Uuid::new_v4()));
        fs::rename(&queue, &processing).await.map_err(|e| QueueError::io(&processing, e))?;
        fs::File::create(&queue).await.map_err(|e| QueueError::io(&queue, e))?;

        Ok(Some(ProcessingClaim { path: processing }))
    }

    /// Completes a retry cycle: appends the survivors to the queue and only
    /// then unlinks the processing file, all under one lock hold.
    ///
    /// # Errors
    ///
    /// On append failure the processing file is left in place so next-boot
    /// recovery reclaims the data; the error is returned to abort the
    /// cycle.
    pub async fn finish_cycle(
        &self,
        claim: ProcessingClaim,
        survivors: &[FailedForward],
    ) -> Result<()> {
        let lock = QueueLock::acquire(&self.lock_path()).await?;

        if let Err(e) = self.append_lines(survivors).await {
            error!(
                error = %e,
                processing = %claim.path.display(),
                "survivor append failed, leaving processing file for recovery"
            );
            lock.release().await?;
            return Err(e);
        }

        let removed = fs::remove_file(&claim.path).await;
        lock.release().await?;
        removed.map_err(|e| QueueError::io(&claim.path, e))
    }

    /// Reattaches orphaned processing files left by a crashed cycle.
    ///
    /// Each orphan's bytes are appended to the queue verbatim (no
    /// transcoding) and the orphan unlinked, under the lock. Individual
    /// orphan failures are logged and skipped. Running recovery twice
    /// yields the same queue contents as running it once.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] only for layout or lock failures.
    pub async fn recover_orphans(&self) -> Result<usize> {
        self.ensure_layout().await?;

        let orphans = self.transient_files(PROCESSING_PREFIX).await?;
        if orphans.is_empty() {
            return Ok(0);
        }

        let lock = QueueLock::acquire(&self.lock_path()).await?;
        let mut recovered = 0;
        for orphan in &orphans {
            match self.reattach(orphan).await {
                Ok(()) => recovered += 1,
                Err(e) => {
                    warn!(
                        orphan = %orphan.display(),
                        error = %e,
                        "failed to reattach orphaned processing file"
                    );
                },
            }
        }
        lock.release().await?;
        Ok(recovered)
    }

    async fn reattach(&self, orphan: &Path) -> Result<()> {
        let bytes = fs::read(orphan).await.map_err(|e| QueueError::io(orphan, e))?;
        if !bytes.is_empty() {
            let queue = self.queue_path();
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&queue)
                .await
                .map_err(|e| QueueError::io(&queue, e))?;
            file.write_all(&bytes).await.map_err(|e| QueueError::io(&queue, e))?;
            file.sync_all().await.map_err(|e| QueueError::io(&queue, e))?;
        }
        fs::remove_file(orphan).await.map_err(|e| QueueError::io(orphan, e))
    }

    /// Scans the queue for counter values without holding the lock during
    /// the scan: the queue is copied to `snapshot.<uuid>.jsonl` under the
    /// lock, the copy is stream-scanned lock-free, then unlinked. The
    /// resulting counters replace the in-memory ones.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] on lock or filesystem failure.
    pub async fn scan_metrics(&self) -> Result<QueueScan> {
        self.ensure_layout().await?;

        let snapshot =
            self.data_dir.join(format!("{SNAPSHOT_PREFIX}{}{JSONL_SUFFIX}", Uuid::new_v4()));
        let lock = QueueLock::acquire(&self.lock_path()).await?;
        let copied = fs::copy(self.queue_path(), &snapshot).await;
        lock.release().await?;
        copied.map_err(|e| QueueError::io(&snapshot, e))?;

        let scan = scan_file(&snapshot, self.clock.now_utc()).await;
        let _ = fs::remove_file(&snapshot).await;
        let scan = scan?;

        self.metrics.apply_scan(scan);
        Ok(scan)
    }

    async fn append_under_lock(&self, entries: &[FailedForward]) -> Result<()> {
        self.ensure_layout().await?;
        let lock = QueueLock::acquire(&self.lock_path()).await?;
        let appended = self.append_lines(entries).await;
        lock.release().await?;
        appended
    }

    async fn append_lines(&self, entries: &[FailedForward]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut buffer = String::new();
        for entry in entries {
            buffer.push_str(&serde_json::to_string(entry)?);
            buffer.push('\n');
        }

        let queue = self.queue_path();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&queue)
            .await
            .map_err(|e| QueueError::io(&queue, e))?;
        file.write_all(buffer.as_bytes()).await.map_err(|e| QueueError::io(&queue, e))?;
        file.sync_all().await.map_err(|e| QueueError::io(&queue, e))?;
        Ok(())
    }

    async fn transient_files(&self, prefix: &str) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        let mut dir = fs::read_dir(&self.data_dir)
            .await
            .map_err(|e| QueueError::io(&self.data_dir, e))?;
        while let Some(dir_entry) =
            dir.next_entry().await.map_err(|e| QueueError::io(&self.data_dir, e))?
        {
            let name = dir_entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(prefix) && name.ends_with(JSONL_SUFFIX) {
                found.push(dir_entry.path());
            }
        }
        found.sort();
        Ok(found)
    }
}

/// Streams a JSON-lines file and derives counter values.
///
/// `failed` counts every non-empty line; due-ness and the earliest
/// `nextAttempt` come from the lines that parse. Unparsable lines are
/// logged and skipped.
///
/// # Errors
///
/// Returns [`QueueError::Io`] when the file cannot be read.
pub async fn scan_file(path: &Path, now: chrono::DateTime<chrono::Utc>) -> Result<QueueScan> {
    let file = fs::File::open(path).await.map_err(|e| QueueError::io(path, e))?;
    let mut lines = BufReader::new(file).lines();

    let mut scan = QueueScan::default();
    while let Some(line) = lines.next_line().await.map_err(|e| QueueError::io(path, e))? {
        if line.trim().is_empty() {
            continue;
        }
        scan.failed += 1;
        match serde_json::from_str::<FailedForward>(&line) {
            Ok(entry) => {
                if entry.is_due(now) {
                    scan.retryable_now += 1;
                }
                if scan.next_due_at.is_none_or(|due| entry.next_attempt < due) {
                    scan.next_due_at = Some(entry.next_attempt);
                }
            },
            Err(e) => warn!(error = %e, "skipping unparsable queue line during scan"),
        }
    }
    Ok(scan)
}

/// Loads every parsable entry from a JSON-lines file, skipping bad lines.
///
/// # Errors
///
/// Returns [`QueueError::Io`] when the file cannot be read.
pub async fn load_entries(path: &Path) -> Result<Vec<FailedForward>> {
    let file = fs::File::open(path).await.map_err(|e| QueueError::io(path, e))?;
    let mut lines = BufReader::new(file).lines();

    let mut entries = Vec::new();
    while let Some(line) = lines.next_line().await.map_err(|e| QueueError::io(path, e))? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<FailedForward>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(error = %e, "skipping unparsable queue line"),
        }
    }
    Ok(entries)
}
