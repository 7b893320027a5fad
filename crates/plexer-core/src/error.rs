//! Validation errors for inbound event envelopes.
//!
//! Each variant names the offending field so the ingress can return a
//! descriptive 400 without leaking internals.

use thiserror::Error;

/// Rejection reasons for an inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The request body parsed to something other than a JSON object.
    #[error("Event must be a JSON object")]
    NotAnObject,

    /// A required field is absent.
    #[error("Missing required field: {field}")]
    MissingField {
        /// Name of the absent field.
        field: &'static str,
    },

    /// A field is present but not a string.
    #[error("Field {field} must be a string")]
    NotAString {
        /// Name of the mistyped field.
        field: &'static str,
    },

    /// A string field is empty after trimming.
    #[error("Field {field} must not be empty")]
    Empty {
        /// Name of the empty field.
        field: &'static str,
    },

    /// A string field exceeds the length limit after normalization.
    #[error("Field {field} exceeds {limit} characters")]
    TooLong {
        /// Name of the oversized field.
        field: &'static str,
        /// Maximum permitted length in characters.
        limit: usize,
    },

    /// The payload cannot be serialized back to JSON.
    #[error("Payload is not serializable: {message}")]
    UnserializablePayload {
        /// Serializer error description.
        message: String,
    },
}

impl ValidationError {
    /// Creates a missing-field error.
    pub const fn missing(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    /// Creates a not-a-string error.
    pub const fn not_a_string(field: &'static str) -> Self {
        Self::NotAString { field }
    }

    /// Creates an empty-field error.
    pub const fn empty(field: &'static str) -> Self {
        Self::Empty { field }
    }
}
