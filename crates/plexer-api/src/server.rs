//! HTTP server configuration and request routing.
//!
//! Assembles the Axum router with the middleware stack: request-id
//! injection, request tracing, a request timeout, and the body-size limit
//! that produces 413 for oversized events.

use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::{handlers, AppState};

/// Response header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request id, readable from request extensions by any handler.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Maximum accepted request body size. Oversized bodies get a 413 before
/// the handler runs.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Request timeout for the whole HTTP surface.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates the router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::welcome))
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status_report))
        .route("/events", post(handlers::ingest_event))
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Middleware tagging each request with a [`RequestId`] and echoing it as
/// a response header.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    req.extensions_mut().insert(id);

    let header = HeaderValue::from_str(&id.0.to_string());
    let mut response = next.run(req).await;
    match header {
        Ok(value) => {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
            response
        },
        // A hyphenated UUID is printable ASCII; this arm is unreachable.
        Err(_) => response,
    }
}
