//! Core domain types for the plexer event router.
//!
//! Provides the event envelope and its validator, consumer descriptors and
//! the registry, the routing policy matrix, shared delivery metrics, and the
//! clock abstraction. All other crates depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod consumer;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod time;

pub use consumer::{AuthKind, Consumer, ConsumerRegistry};
pub use envelope::{Envelope, MAX_FIELD_LENGTH};
pub use error::ValidationError;
pub use metrics::{DeliveryMetrics, MetricsSnapshot, QueueScan};
pub use policy::{route, Route, BEST_EFFORT_EVENTS, BROADCAST_EVENTS, CRITICAL_KEY};
pub use time::{Clock, RealClock};
