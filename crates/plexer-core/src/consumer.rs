//! Downstream consumer descriptors and the static registry.
//!
//! Consumers are immutable for the process lifetime. A consumer whose URL is
//! unset is skipped silently at both first attempt and retry.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Authentication header scheme for a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthKind {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// `X-Auth: <token>`
    XAuth,
}

impl AuthKind {
    /// Parses an auth kind from configuration.
    ///
    /// Unknown kinds log a warning and default to bearer.
    pub fn parse_or_bearer(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "bearer" => Self::Bearer,
            "x-auth" => Self::XAuth,
            other => {
                warn!(auth_kind = other, "unknown auth kind, defaulting to bearer");
                Self::Bearer
            },
        }
    }
}

/// A downstream consumer of forwarded events.
#[derive(Debug, Clone, PartialEq)]
pub struct Consumer {
    /// Stable key used by the policy matrix and queue entries.
    pub key: String,
    /// Human-readable name used in logs.
    pub label: String,
    /// Absolute URL events are POSTed to. `None` means the consumer is
    /// configured but unreachable and must be skipped.
    pub url: Option<String>,
    /// Authentication token. Empty tokens emit no auth header.
    pub token: Option<String>,
    /// Header scheme used when a token is present.
    pub auth_kind: AuthKind,
}

impl Consumer {
    /// Builds the authentication header for this consumer.
    ///
    /// Returns `None` when no token is configured or the token is empty.
    pub fn auth_header(&self) -> Option<(&'static str, String)> {
        let token = self.token.as_deref().filter(|t| !t.is_empty())?;
        match self.auth_kind {
            AuthKind::Bearer => Some(("Authorization", format!("Bearer {token}"))),
            AuthKind::XAuth => Some(("X-Auth", token.to_string())),
        }
    }
}

/// The immutable set of configured consumers.
#[derive(Debug, Clone, Default)]
pub struct ConsumerRegistry {
    consumers: Vec<Consumer>,
}

impl ConsumerRegistry {
    /// Creates a registry from descriptors.
    pub fn new(consumers: Vec<Consumer>) -> Self {
        Self { consumers }
    }

    /// Iterates all registered consumers.
    pub fn iter(&self) -> impl Iterator<Item = &Consumer> {
        self.consumers.iter()
    }

    /// Looks up a consumer by key.
    pub fn get(&self, key: &str) -> Option<&Consumer> {
        self.consumers.iter().find(|c| c.key == key)
    }

    /// Number of registered consumers.
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}
