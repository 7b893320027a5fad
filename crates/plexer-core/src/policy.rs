//! Routing policy for (event type, consumer) pairs.
//!
//! A pure function shared by the first-attempt dispatcher and the retry
//! worker, so both sides make identical forward/queue decisions.

/// Consumer key whose failed deliveries are durably queued.
pub const CRITICAL_KEY: &str = "heimgeist";

/// Event types delivered to every registered consumer.
pub const BROADCAST_EVENTS: &[&str] = &[
    "knowledge.observatory.published.v1",
    "knowledge.digest.published.v1",
    "integrity.summary.published.v1",
];

/// Event types that are never queued on failure, for any consumer.
pub const BEST_EFFORT_EVENTS: &[&str] =
    &["integrity.summary.published.v1", "telemetry.heartbeat.v1"];

/// Routing decision for one (event type, consumer) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Whether the event is POSTed to this consumer at all.
    pub forward: bool,
    /// Whether a failed delivery is appended to the failure queue.
    pub queue_on_fail: bool,
}

/// Decides forwarding and queueing for one (event type, consumer) pair.
///
/// Broadcast types reach all consumers; everything else reaches only the
/// critical consumer. Failures queue only for the critical consumer, and
/// only when the type is not best-effort.
pub fn route(event_type: &str, consumer_key: &str) -> Route {
    let critical = consumer_key == CRITICAL_KEY;
    Route {
        forward: critical || BROADCAST_EVENTS.contains(&event_type),
        queue_on_fail: critical && !BEST_EFFORT_EVENTS.contains(&event_type),
    }
}
