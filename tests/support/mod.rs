//! Shared helpers for end-to-end tests.
//!
//! Boots a full plexer instance (router, dispatcher, queue) against a
//! temporary data directory on an ephemeral port, and exposes handles for
//! driving the retry worker manually.

#![allow(dead_code)]

use std::sync::Arc;

use plexer_api::{create_router, AppState};
use plexer_core::{Clock, ConsumerRegistry, RealClock};
use plexer_delivery::{
    FanoutDispatcher, ForwardClient, InFlight, RetryConfig, RetryWorker,
};
use plexer_queue::FailureQueue;
use plexer_testing::TestEnv;
use tokio_util::sync::CancellationToken;

/// A running plexer instance under test.
pub struct TestApp {
    /// Base URL of the bound ingress, e.g. `http://127.0.0.1:49201`.
    pub base_url: String,
    /// HTTP client for driving the ingress.
    pub http: reqwest::Client,
    /// In-flight gauge shared with the dispatcher.
    pub in_flight: InFlight,
    /// Queue handle over the test data directory.
    pub queue: Arc<FailureQueue>,
    /// Registry the app was booted with.
    pub registry: Arc<ConsumerRegistry>,
}

/// Boots the full HTTP surface over `env`'s data directory.
pub async fn spawn_app(env: &TestEnv, registry: ConsumerRegistry) -> TestApp {
    let registry = Arc::new(registry);
    let clock: Arc<dyn Clock> = Arc::new(RealClock);
    let queue = Arc::new(FailureQueue::new(env.data_dir(), env.metrics.clone(), clock));
    let in_flight = InFlight::new();

    let dispatcher = Arc::new(FanoutDispatcher::new(
        registry.clone(),
        ForwardClient::with_defaults().expect("forward client should build"),
        queue.clone(),
        env.metrics.clone(),
        in_flight.clone(),
    ));

    let state = AppState {
        dispatcher,
        metrics: env.metrics.clone(),
        in_flight: in_flight.clone(),
        environment: "test".to_string(),
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("failed to bind");
    let addr = listener.local_addr().expect("failed to read local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server failed");
    });

    TestApp {
        base_url: format!("http://{addr}"),
        http: reqwest::Client::new(),
        in_flight,
        queue,
        registry,
    }
}

/// Builds a retry worker over `env`'s data directory using the real clock.
pub fn worker(env: &TestEnv, registry: ConsumerRegistry) -> RetryWorker {
    worker_with_clock(env, registry, Arc::new(RealClock))
}

/// Builds a retry worker with an explicit (usually virtual) clock.
pub fn worker_with_clock(
    env: &TestEnv,
    registry: ConsumerRegistry,
    clock: Arc<dyn Clock>,
) -> RetryWorker {
    let queue = Arc::new(FailureQueue::new(env.data_dir(), env.metrics.clone(), clock.clone()));
    RetryWorker::new(
        queue,
        Arc::new(registry),
        ForwardClient::with_defaults().expect("forward client should build"),
        env.metrics.clone(),
        clock,
        RetryConfig::default(),
        CancellationToken::new(),
    )
}

/// A URL on which nothing listens; connections are refused immediately.
pub fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind");
    let addr = listener.local_addr().expect("failed to read local addr");
    drop(listener);
    format!("http://{addr}")
}

/// Names of `processing.*.jsonl` files currently in the data directory.
pub fn processing_files(env: &TestEnv) -> Vec<String> {
    std::fs::read_dir(env.data_dir())
        .expect("data dir should be readable")
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| name.starts_with("processing."))
        .collect()
}
