//! Event ingestion handler.
//!
//! Accepts the envelope, validates it, and schedules the fanout
//! asynchronously: the 202 is sent before any consumer is contacted.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use plexer_core::Envelope;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::AppState;

/// Error body returned for rejected events.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Always `"error"`.
    pub status: &'static str,
    /// Human-readable rejection reason.
    pub message: String,
}

/// Acceptance body returned for valid events.
#[derive(Debug, Serialize)]
pub struct AcceptedBody {
    /// Always `"accepted"`.
    pub status: &'static str,
}

/// `POST /events` - validates and dispatches one envelope.
#[instrument(name = "ingest_event", skip(state, body), fields(body_bytes = body.len()))]
pub async fn ingest_event(State(state): State<AppState>, body: Bytes) -> Response {
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "rejecting body that is not JSON");
            return reject("Invalid JSON".to_string());
        },
    };

    let envelope = match Envelope::validate(&value) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "rejecting invalid envelope");
            return reject(e.to_string());
        },
    };

    info!(
        event_type = %envelope.event_type,
        source = %envelope.source,
        "event accepted"
    );

    state.dispatcher.dispatch(envelope);

    (StatusCode::ACCEPTED, Json(AcceptedBody { status: "accepted" })).into_response()
}

fn reject(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { status: "error", message })).into_response()
}
