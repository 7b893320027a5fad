//! Shutdown drain scenarios: the bounded wait completes once in-flight
//! fanout settles, and gives up cleanly when it cannot.

mod support;

use std::time::Duration;

use plexer_core::{AuthKind, ConsumerRegistry};
use plexer_delivery::DrainOutcome;
use plexer_testing::{env::consumer, TestEnv};
use serde_json::json;
use support::spawn_app;
use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn drain_completes_once_the_pending_call_settles() {
    let server = MockServer::start().await;
    // The downstream answers after 50ms; the drain window is 200ms.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(50)))
        .expect(1)
        .mount(&server)
        .await;

    let env = TestEnv::new();
    let registry = ConsumerRegistry::new(vec![consumer(
        "heimgeist",
        Some(server.uri()),
        None,
        AuthKind::Bearer,
    )]);
    let app = spawn_app(&env, registry).await;

    let response = app
        .http
        .post(format!("{}/events", app.base_url))
        .json(&json!({"type": "test.event", "source": "test-suite", "payload": null}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202, "ingress answers before the downstream settles");

    let outcome = app.in_flight.drain(Duration::from_millis(200)).await;
    assert_eq!(outcome, DrainOutcome::Complete);
    assert_eq!(app.in_flight.pending(), 0);
    server.verify().await;
}

#[tokio::test]
async fn drain_times_out_when_a_call_hangs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let env = TestEnv::new();
    let registry = ConsumerRegistry::new(vec![consumer(
        "heimgeist",
        Some(server.uri()),
        None,
        AuthKind::Bearer,
    )]);
    let app = spawn_app(&env, registry).await;

    app.http
        .post(format!("{}/events", app.base_url))
        .json(&json!({"type": "test.event", "source": "test-suite", "payload": null}))
        .send()
        .await
        .unwrap();

    let outcome = app.in_flight.drain(Duration::from_millis(50)).await;
    assert_eq!(outcome, DrainOutcome::TimedOut { remaining: 1 });
}
