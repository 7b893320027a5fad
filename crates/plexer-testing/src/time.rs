//! Deterministic time control for tests.
//!
//! `TestClock` implements the core `Clock` trait over a virtual timeline
//! of epoch milliseconds: sleeping advances the timeline immediately, so
//! retry schedules can be exercised without real waiting.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use plexer_core::Clock;

/// Controllable clock for deterministic tests.
///
/// Clones share one timeline: advancing any handle moves them all.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Current virtual time, in milliseconds since the UNIX epoch.
    epoch_millis: Arc<AtomicU64>,
    /// Timeline origin, for elapsed-time queries.
    started_at_millis: u64,
}

impl TestClock {
    /// Creates a test clock starting at the current wall time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a test clock starting at a specific UTC instant.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        let millis = start.timestamp_millis().max(0) as u64;
        Self { epoch_millis: Arc::new(AtomicU64::new(millis)), started_at_millis: millis }
    }

    /// Advances the virtual timeline.
    pub fn advance(&self, duration: Duration) {
        self.epoch_millis.fetch_add(duration.as_millis() as u64, Ordering::AcqRel);
    }

    /// Virtual time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        let current = self.epoch_millis.load(Ordering::Acquire);
        Duration::from_millis(current.saturating_sub(self.started_at_millis))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let millis = self.epoch_millis.load(Ordering::Acquire);
        DateTime::from_timestamp_millis(millis as i64).expect("virtual timestamp in range")
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        // Sleeping advances virtual time; yielding lets other tasks run.
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_the_timeline() {
        let start = DateTime::from_timestamp_millis(1_000_000).unwrap();
        let clock = TestClock::starting_at(start);

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now_utc(), start + chrono::Duration::seconds(90));
        assert_eq!(clock.elapsed(), Duration::from_secs(90));
    }

    #[tokio::test]
    async fn sleep_advances_without_waiting() {
        let clock = TestClock::new();
        let before = clock.now_utc();

        clock.sleep(Duration::from_secs(3_600)).await;

        let elapsed = clock.now_utc() - before;
        assert_eq!(elapsed.num_seconds(), 3_600);
    }

    #[test]
    fn clones_share_the_timeline() {
        let clock = TestClock::new();
        let twin = clock.clone();

        clock.advance(Duration::from_secs(10));

        assert_eq!(twin.elapsed(), Duration::from_secs(10));
        assert_eq!(twin.now_utc(), clock.now_utc());
    }
}
