//! Queue entry model and its retry schedule.
//!
//! One entry is one line of `failed_forwards.jsonl`. Entries are created by
//! the dispatcher on first failure, mutated only by the retry worker, and
//! destroyed when a retry observes a 2xx.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use plexer_core::Envelope;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{QueueError, Result};

/// Delay before the first retry of a freshly queued failure.
const INITIAL_DELAY_SECS: i64 = 30;

/// Base unit of the exponential retry backoff.
const RETRY_BASE_SECS: u64 = 60;

/// Backoff ceiling.
const MAX_DELAY_SECS: u64 = 24 * 60 * 60;

/// Upper bound of the random jitter added to every schedule, exclusive.
const JITTER_MILLIS: u64 = 10_000;

/// A failed delivery awaiting retry.
///
/// Wire field names are camelCase to match the persisted JSON-lines format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedForward {
    /// Key of the consumer the delivery targets.
    pub consumer_key: String,
    /// The full validated envelope, forwarded verbatim on retry.
    pub event: Envelope,
    /// Number of retry attempts made so far.
    pub retry_count: u32,
    /// Timestamp of the most recent attempt.
    pub last_attempt: DateTime<Utc>,
    /// Earliest time the next attempt may run.
    pub next_attempt: DateTime<Utc>,
    /// Last observed error.
    pub error: String,
}

impl FailedForward {
    /// Creates an entry for a first-attempt failure.
    ///
    /// The initial schedule is `now + 30s` plus up to 10s of jitter, so a
    /// burst of failures does not retry as a thundering herd.
    pub fn new(
        event: Envelope,
        consumer_key: impl Into<String>,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            event,
            retry_count: 0,
            last_attempt: now,
            next_attempt: now + ChronoDuration::seconds(INITIAL_DELAY_SECS) + jitter(),
            error: error.into(),
        }
    }

    /// Whether the entry is due for a retry attempt.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt <= now
    }

    /// Records a failed retry attempt: bumps the count and reschedules with
    /// exponential backoff `min(2^retryCount * 60s, 24h)` plus jitter.
    pub fn record_failure(&mut self, now: DateTime<Utc>, error: impl Into<String>) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_attempt = now;
        self.next_attempt = now + retry_delay(self.retry_count) + jitter();
        self.error = error.into();
    }

    /// Validates the entry schema before persistence.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidEntry`] naming the empty field.
    pub fn validate(&self) -> Result<()> {
        if self.consumer_key.is_empty() {
            return Err(QueueError::invalid_entry("consumerKey is empty"));
        }
        if self.event.event_type.is_empty() {
            return Err(QueueError::invalid_entry("event type is empty"));
        }
        if self.event.source.is_empty() {
            return Err(QueueError::invalid_entry("event source is empty"));
        }
        Ok(())
    }
}

/// Deterministic portion of the backoff for a given retry count.
pub fn retry_delay(retry_count: u32) -> ChronoDuration {
    // 60 << 11 already exceeds the 24h ceiling, so larger shifts are moot.
    let exponent = retry_count.min(11);
    let secs = (RETRY_BASE_SECS << exponent).min(MAX_DELAY_SECS);
    ChronoDuration::seconds(secs as i64)
}

fn jitter() -> ChronoDuration {
    ChronoDuration::milliseconds(rand::rng().random_range(0..JITTER_MILLIS) as i64)
}
