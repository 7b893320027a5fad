//! Error types for delivery attempts.
//!
//! Errors carry enough context to build the queue entry's error string:
//! the HTTP status when a response arrived, or the transport failure
//! otherwise. 401/403 responses are tagged so a rejected token is visible
//! in logs and queue entries without digging through response bodies.

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failure modes of one outbound delivery attempt.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Transport-level failure before any response arrived.
    #[error("network connection failed: {message}")]
    Network {
        /// Error message describing the failure.
        message: String,
    },

    /// The per-attempt timeout elapsed.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Configured timeout in seconds.
        timeout_seconds: u64,
    },

    /// A response arrived with a non-2xx status.
    #[error("request failed with status {code}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Truncated response body, for logs.
        body: String,
    },

    /// The HTTP client could not be constructed.
    #[error("delivery client configuration error: {message}")]
    Configuration {
        /// Builder error description.
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a status error from a response.
    pub fn status(code: u16, body: impl Into<String>) -> Self {
        Self::Status { code, body: body.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// HTTP status code, when a response arrived.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The error string recorded in logs and queue entries.
    ///
    /// Includes the status or the transport message; 401/403 append
    /// `" (token rejected)"`.
    pub fn forward_message(&self) -> String {
        let base = self.to_string();
        match self.status_code() {
            Some(401 | 403) => format!("{base} (token rejected)"),
            _ => base,
        }
    }
}
