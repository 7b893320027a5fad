//! Time source abstraction.
//!
//! Everything time-dependent in the router works in UTC wall time: queue
//! entry schedules, retry due-ness checks, and tick pacing. The clock
//! surface is therefore a single UTC reading plus an async pause; there is
//! no monotonic-instant API to misuse for persisted timestamps. Tests
//! substitute a virtual implementation to drive schedules without waiting.

use std::{future::Future, pin::Pin, time::Duration};

use chrono::{DateTime, Utc};

/// Source of UTC time and async pauses.
pub trait Clock: Send + Sync {
    /// Returns the current UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Pauses for the given duration.
    ///
    /// The production clock defers to the runtime timer; virtual clocks
    /// may advance their own timeline and return immediately.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Wall-clock implementation backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}
