//! Fanout dispatch and retry delivery for the plexer event router.
//!
//! The dispatcher issues concurrent POSTs to every consumer the policy
//! matrix selects for an event, tracks the in-flight set for shutdown
//! drain, and hands critical failures to the durable queue. The retry
//! worker periodically claims the queue, attempts due entries with bounded
//! concurrency, and persists the survivors.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod inflight;
pub mod worker;

pub use client::{ClientConfig, ForwardClient, ForwardReceipt};
pub use dispatcher::FanoutDispatcher;
pub use error::{DeliveryError, Result};
pub use inflight::{DrainOutcome, InFlight};
pub use worker::{RetryConfig, RetryWorker};

/// Default number of concurrent retry attempts per cycle.
pub const DEFAULT_RETRY_CONCURRENCY: usize = 5;

/// Default number of entries processed per chunk within a cycle.
pub const DEFAULT_RETRY_BATCH_SIZE: usize = 50;

/// Default per-attempt timeout for outbound POSTs.
pub const DEFAULT_FORWARD_TIMEOUT_SECONDS: u64 = 10;
