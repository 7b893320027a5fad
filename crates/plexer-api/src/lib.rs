//! HTTP ingress and status surface for the plexer event router.
//!
//! Provides the single ingestion endpoint, the read-only status report,
//! liveness endpoints, and environment-based configuration with fail-fast
//! validation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod handlers;
pub mod server;

use std::sync::Arc;

use plexer_core::DeliveryMetrics;
use plexer_delivery::{FanoutDispatcher, InFlight};

pub use config::Config;
pub use server::create_router;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Fanout dispatcher events are handed to after validation.
    pub dispatcher: Arc<FanoutDispatcher>,
    /// Queue-derived delivery counters.
    pub metrics: DeliveryMetrics,
    /// Gauge of outstanding delivery calls.
    pub in_flight: InFlight,
    /// Deployment environment name, echoed by the root endpoint.
    pub environment: String,
}
