//! Read-only delivery status report.
//!
//! The report is itself an envelope, so consumers of the status endpoint
//! can treat it like any other plexer event.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;

/// The status envelope.
#[derive(Debug, Serialize)]
pub struct DeliveryReport {
    /// Report envelope type.
    #[serde(rename = "type")]
    pub report_type: &'static str,
    /// Report source.
    pub source: &'static str,
    /// Delivery counters.
    pub payload: ReportPayload,
}

/// Counter payload of the status envelope.
#[derive(Debug, Serialize)]
pub struct ReportPayload {
    /// In-flight and queued counts.
    pub counts: ReportCounts,
    /// Most recent delivery or persistence error.
    pub last_error: Option<String>,
    /// Completion time of the most recent retry tick.
    pub last_retry_at: Option<DateTime<Utc>>,
    /// Queue entries currently due.
    pub retryable_now: u64,
    /// Earliest scheduled retry, if any.
    pub next_due_at: Option<DateTime<Utc>>,
}

/// Count pair of the status payload.
#[derive(Debug, Serialize)]
pub struct ReportCounts {
    /// Outstanding fanout POSTs.
    pub pending: usize,
    /// Line count of the failure queue.
    pub failed: u64,
}

/// `GET /status` - delivery report envelope.
pub async fn status_report(State(state): State<AppState>) -> Json<DeliveryReport> {
    let snapshot = state.metrics.snapshot();

    Json(DeliveryReport {
        report_type: "plexer.delivery.report.v1",
        source: "plexer",
        payload: ReportPayload {
            counts: ReportCounts {
                pending: state.in_flight.pending(),
                failed: snapshot.failed,
            },
            last_error: snapshot.last_error,
            last_retry_at: snapshot.last_retry_at,
            retryable_now: snapshot.retryable_now,
            next_due_at: snapshot.next_due_at,
        },
    })
}
