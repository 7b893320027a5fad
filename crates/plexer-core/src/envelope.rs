//! The event envelope and its structural validator.
//!
//! An envelope is exactly `{type, source, payload}`. Forwarded bodies carry
//! these three fields and nothing else; no identifiers or timestamps are
//! injected anywhere in the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Maximum length of `type` and `source` after normalization, in characters.
pub const MAX_FIELD_LENGTH: usize = 256;

/// A validated event envelope.
///
/// `event_type` is stored lowercased and `source` trimmed, so the struct is
/// always in its forwarded form. Serialization produces the exact wire shape
/// `{"type": ..., "source": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event type, lowercased.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Originating system, trimmed.
    pub source: String,
    /// Arbitrary JSON payload. `null` is a valid payload.
    pub payload: Value,
}

impl Envelope {
    /// Validates a parsed JSON value and returns the normalized envelope.
    ///
    /// Rules: the value must be an object; `type` and `source` must be
    /// strings that are non-empty after trimming and at most
    /// [`MAX_FIELD_LENGTH`] characters after normalization; `payload` must
    /// be present but may be any JSON value, including `null`.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the offending field.
    pub fn validate(value: &Value) -> Result<Self, ValidationError> {
        let object = value.as_object().ok_or(ValidationError::NotAnObject)?;

        let event_type = normalized_field(object, "type")?.to_lowercase();
        let source = normalized_field(object, "source")?;

        let payload =
            object.get("payload").cloned().ok_or(ValidationError::missing("payload"))?;

        let envelope = Self { event_type, source, payload };

        // Parsed values are serializable by construction, but the contract is
        // that anything accepted here can be forwarded verbatim.
        if let Err(e) = serde_json::to_string(&envelope) {
            return Err(ValidationError::UnserializablePayload { message: e.to_string() });
        }

        Ok(envelope)
    }

    /// Returns the `repo` payload key, if the payload is an object carrying
    /// one. Used only for log enrichment on successful forwards.
    pub fn repo(&self) -> Option<&Value> {
        self.payload.as_object().and_then(|object| object.get("repo"))
    }
}

/// Extracts a required string field, trims it, and enforces the length limit.
fn normalized_field(
    object: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<String, ValidationError> {
    let raw = object.get(field).ok_or(ValidationError::missing(field))?;
    let text = raw.as_str().ok_or(ValidationError::not_a_string(field))?;

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::empty(field));
    }
    if trimmed.chars().count() > MAX_FIELD_LENGTH {
        return Err(ValidationError::TooLong { field, limit: MAX_FIELD_LENGTH });
    }

    Ok(trimmed.to_string())
}
