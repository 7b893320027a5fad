//! HTTP client for forwarding envelopes to consumers.
//!
//! The body POSTed to a consumer is the pass-through serialization of the
//! validated envelope: exactly `{type, source, payload}`, nothing injected.
//! Auth headers are derived from the consumer descriptor.

use std::time::Duration;

use plexer_core::{Consumer, Envelope};
use tracing::debug;

use crate::error::{DeliveryError, Result};

/// Maximum response-body length captured for logs.
const MAX_CAPTURED_BODY: usize = 1024;

/// Configuration for the forward client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-attempt timeout for outbound requests.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_FORWARD_TIMEOUT_SECONDS),
            user_agent: format!("plexer/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Receipt for a successful (2xx) forward.
#[derive(Debug, Clone, Copy)]
pub struct ForwardReceipt {
    /// HTTP status code of the response.
    pub status: u16,
}

/// HTTP client shared by the dispatcher and the retry worker.
///
/// Cloning is cheap; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct ForwardClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl ForwardClient {
    /// Creates a forward client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Configuration`] when the HTTP client cannot
    /// be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| DeliveryError::configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Creates a forward client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Configuration`] when the HTTP client cannot
    /// be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// POSTs the envelope to `url` with the consumer's auth header.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Timeout`] or [`DeliveryError::Network`] when
    /// no response arrived, and [`DeliveryError::Status`] for non-2xx
    /// responses.
    pub async fn forward(
        &self,
        consumer: &Consumer,
        url: &str,
        envelope: &Envelope,
    ) -> Result<ForwardReceipt> {
        let mut request = self.client.post(url).json(envelope);
        if let Some((name, value)) = consumer.auth_header() {
            request = request.header(name, value);
        }

        debug!(consumer = %consumer.key, url, event_type = %envelope.event_type, "forwarding event");

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(DeliveryError::timeout(self.config.timeout.as_secs()))
            },
            Err(e) => return Err(DeliveryError::network(e.to_string())),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(ForwardReceipt { status: status.as_u16() });
        }

        let body = match response.text().await {
            Ok(text) => truncate_body(&text),
            Err(_) => String::new(),
        };
        Err(DeliveryError::status(status.as_u16(), body))
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_CAPTURED_BODY {
        return body.to_string();
    }
    let mut cut = MAX_CAPTURED_BODY;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... (truncated)", &body[..cut])
}

#[cfg(test)]
mod tests {
    use plexer_core::AuthKind;
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn envelope() -> Envelope {
        Envelope {
            event_type: "test.event".to_string(),
            source: "test-suite".to_string(),
            payload: json!({"foo": "bar"}),
        }
    }

    fn consumer(url: &str, token: Option<&str>, auth_kind: AuthKind) -> Consumer {
        Consumer {
            key: "heimgeist".to_string(),
            label: "Heimgeist".to_string(),
            url: Some(url.to_string()),
            token: token.map(str::to_string),
            auth_kind,
        }
    }

    #[tokio::test]
    async fn body_is_the_exact_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events"))
            .and(body_json(
                json!({"type": "test.event", "source": "test-suite", "payload": {"foo": "bar"}}),
            ))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = ForwardClient::with_defaults().unwrap();
        let url = format!("{}/events", server.uri());
        let target = consumer(&url, None, AuthKind::Bearer);

        let receipt = client.forward(&target, &url, &envelope()).await.unwrap();
        assert_eq!(receipt.status, 200);
    }

    #[tokio::test]
    async fn bearer_token_header_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("Authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = ForwardClient::with_defaults().unwrap();
        let target = consumer(&server.uri(), Some("s3cret"), AuthKind::Bearer);

        let receipt = client.forward(&target, &server.uri(), &envelope()).await.unwrap();
        assert_eq!(receipt.status, 204);
    }

    #[tokio::test]
    async fn x_auth_token_header_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-Auth", "s3cret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = ForwardClient::with_defaults().unwrap();
        let target = consumer(&server.uri(), Some("s3cret"), AuthKind::XAuth);

        client.forward(&target, &server.uri(), &envelope()).await.unwrap();
    }

    #[tokio::test]
    async fn server_errors_become_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down for maintenance"))
            .mount(&server)
            .await;

        let client = ForwardClient::with_defaults().unwrap();
        let target = consumer(&server.uri(), None, AuthKind::Bearer);

        let error = client.forward(&target, &server.uri(), &envelope()).await.unwrap_err();
        match error {
            DeliveryError::Status { code, body } => {
                assert_eq!(code, 503);
                assert_eq!(body, "down for maintenance");
            },
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_token_is_tagged() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(401)).mount(&server).await;

        let client = ForwardClient::with_defaults().unwrap();
        let target = consumer(&server.uri(), Some("expired"), AuthKind::Bearer);

        let error = client.forward(&target, &server.uri(), &envelope()).await.unwrap_err();
        assert!(error.forward_message().ends_with("(token rejected)"));
    }

    #[tokio::test]
    async fn unreachable_consumer_is_a_network_error() {
        // Bind-then-drop guarantees nothing is listening on the port.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = ForwardClient::with_defaults().unwrap();
        let target = consumer(&url, None, AuthKind::Bearer);

        let error = client.forward(&target, &url, &envelope()).await.unwrap_err();
        assert!(matches!(error, DeliveryError::Network { .. }));
    }

    #[test]
    fn long_response_bodies_are_truncated() {
        let long = "x".repeat(4096);
        let truncated = truncate_body(&long);
        assert!(truncated.len() < long.len());
        assert!(truncated.ends_with("... (truncated)"));
    }
}
