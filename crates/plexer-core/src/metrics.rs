//! Shared delivery metrics.
//!
//! Counters describing the failure queue, updated by the queue on enqueue
//! and recomputed from persisted survivors after every retry tick and at
//! boot. Values are approximate between ticks. The `pending` gauge lives
//! with the dispatcher's in-flight tracker, not here.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Cheaply clonable handle to the shared metrics counters.
#[derive(Debug, Clone, Default)]
pub struct DeliveryMetrics {
    inner: Arc<Mutex<MetricsInner>>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    failed: u64,
    retryable_now: u64,
    next_due_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_retry_at: Option<DateTime<Utc>>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    /// Line count of the failure queue.
    pub failed: u64,
    /// Entries whose `nextAttempt` has passed.
    pub retryable_now: u64,
    /// Earliest `nextAttempt` in the queue, if any.
    pub next_due_at: Option<DateTime<Utc>>,
    /// Most recent delivery or persistence error.
    pub last_error: Option<String>,
    /// Completion time of the most recent retry tick.
    pub last_retry_at: Option<DateTime<Utc>>,
}

/// Queue-derived counter values produced by a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueueScan {
    /// Line count of the scanned file.
    pub failed: u64,
    /// Entries due at scan time.
    pub retryable_now: u64,
    /// Earliest `nextAttempt` observed.
    pub next_due_at: Option<DateTime<Utc>>,
}

impl DeliveryMetrics {
    /// Creates a zeroed metrics handle.
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, MetricsInner> {
        // Counter updates cannot panic, so poisoning is unreachable; recover
        // rather than propagate.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Records a freshly queued failure.
    pub fn record_enqueued(&self, error: &str, next_attempt: DateTime<Utc>) {
        let mut inner = self.locked();
        inner.failed += 1;
        inner.last_error = Some(error.to_string());
        if inner.next_due_at.is_none_or(|due| next_attempt < due) {
            inner.next_due_at = Some(next_attempt);
        }
    }

    /// Records an error that prevented a failure from being persisted.
    pub fn record_persistence_error(&self, error: &str) {
        self.locked().last_error = Some(error.to_string());
    }

    /// Records a failed retry attempt.
    pub fn record_attempt_error(&self, error: &str) {
        self.locked().last_error = Some(error.to_string());
    }

    /// Zeroes the queue-derived counters after observing an empty queue.
    pub fn reset_counts(&self) {
        let mut inner = self.locked();
        inner.failed = 0;
        inner.retryable_now = 0;
        inner.next_due_at = None;
    }

    /// Replaces the queue-derived counters from a scan.
    pub fn apply_scan(&self, scan: QueueScan) {
        let mut inner = self.locked();
        inner.failed = scan.failed;
        inner.retryable_now = scan.retryable_now;
        inner.next_due_at = scan.next_due_at;
    }

    /// Replaces the queue-derived counters after a completed retry tick.
    pub fn finish_tick(&self, scan: QueueScan, at: DateTime<Utc>) {
        let mut inner = self.locked();
        inner.failed = scan.failed;
        inner.retryable_now = scan.retryable_now;
        inner.next_due_at = scan.next_due_at;
        inner.last_retry_at = Some(at);
    }

    /// Returns a point-in-time copy of the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.locked();
        MetricsSnapshot {
            failed: inner.failed,
            retryable_now: inner.retryable_now,
            next_due_at: inner.next_due_at,
            last_error: inner.last_error.clone(),
            last_retry_at: inner.last_retry_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn enqueue_bumps_failed_and_lowers_next_due() {
        let metrics = DeliveryMetrics::new();
        let now = Utc::now();

        metrics.record_enqueued("connection refused", now + Duration::seconds(60));
        metrics.record_enqueued("connection refused", now + Duration::seconds(30));
        metrics.record_enqueued("connection refused", now + Duration::seconds(90));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failed, 3);
        assert_eq!(snapshot.next_due_at, Some(now + Duration::seconds(30)));
        assert_eq!(snapshot.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn reset_zeroes_counts_but_keeps_history() {
        let metrics = DeliveryMetrics::new();
        let now = Utc::now();
        metrics.record_enqueued("boom", now);
        metrics.finish_tick(QueueScan::default(), now);

        metrics.reset_counts();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failed, 0);
        assert_eq!(snapshot.next_due_at, None);
        assert_eq!(snapshot.last_error.as_deref(), Some("boom"));
        assert_eq!(snapshot.last_retry_at, Some(now));
    }

    #[test]
    fn tick_replaces_counts_from_survivors() {
        let metrics = DeliveryMetrics::new();
        let now = Utc::now();
        metrics.record_enqueued("first", now);

        let scan = QueueScan {
            failed: 2,
            retryable_now: 1,
            next_due_at: Some(now + Duration::seconds(120)),
        };
        metrics.finish_tick(scan, now);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failed, 2);
        assert_eq!(snapshot.retryable_now, 1);
        assert_eq!(snapshot.next_due_at, Some(now + Duration::seconds(120)));
        assert_eq!(snapshot.last_retry_at, Some(now));
    }
}
