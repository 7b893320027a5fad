//! In-flight call tracking for shutdown drain.
//!
//! The dispatcher does not wait on individual calls; it only needs to know
//! how many are outstanding and when that number reaches zero. A counter
//! with a completion signal is sufficient: guards increment on creation,
//! decrement on drop, and the last one out wakes the drain waiter.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::Notify;

/// Shared gauge of outstanding delivery calls.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    count: AtomicUsize,
    notify: Notify,
}

/// Outcome of a bounded drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every in-flight call settled within the timeout.
    Complete,
    /// The timeout elapsed with calls still outstanding.
    TimedOut {
        /// Number of calls still in flight.
        remaining: usize,
    },
}

/// RAII token for one in-flight call.
#[derive(Debug)]
pub struct InFlightGuard {
    inner: Arc<Inner>,
}

impl InFlight {
    /// Creates a zeroed gauge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one in-flight call; the guard's drop settles it.
    pub fn begin(&self) -> InFlightGuard {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard { inner: self.inner.clone() }
    }

    /// Number of currently outstanding calls.
    pub fn pending(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Waits until the gauge reaches zero or the timeout elapses.
    pub async fn drain(&self, timeout: Duration) -> DrainOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before the zero check so a decrement between
            // the check and the wait cannot be missed.
            let notified = self.inner.notify.notified();
            if self.pending() == 0 {
                return DrainOutcome::Complete;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let remaining = self.pending();
                if remaining == 0 {
                    return DrainOutcome::Complete;
                }
                return DrainOutcome::TimedOut { remaining };
            }
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}
