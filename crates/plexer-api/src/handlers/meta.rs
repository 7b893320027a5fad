//! Root, health, and fallback handlers.

use axum::{
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::AppState;

/// Root endpoint response.
#[derive(Debug, Serialize)]
pub struct Welcome {
    /// Greeting line.
    pub message: &'static str,
    /// Deployment environment name.
    pub environment: String,
}

/// `GET /` - service banner.
pub async fn welcome(State(state): State<AppState>) -> Json<Welcome> {
    Json(Welcome { message: "Welcome to plexer", environment: state.environment })
}

/// `GET /health` - liveness probe.
///
/// Deliberately does not touch the queue or downstream consumers; it only
/// answers whether the process is serving requests.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Fallback for unknown paths.
pub async fn not_found(method: Method, uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "status": "error",
            "message": "Not Found",
            "path": uri.path(),
            "method": method.as_str(),
        })),
    )
        .into_response()
}
