//! Plexer event router.
//!
//! Main entry point. Initializes tracing, loads and validates
//! configuration, runs crash recovery over the failure queue, arms the
//! retry worker, and serves the HTTP ingress until a shutdown signal
//! arrives; then drains in-flight fanout within a bounded window.

use std::sync::Arc;

use anyhow::{Context, Result};
use plexer_api::{create_router, AppState, Config};
use plexer_core::{Clock, DeliveryMetrics, RealClock};
use plexer_delivery::{DrainOutcome, FanoutDispatcher, ForwardClient, InFlight, RetryWorker};
use plexer_queue::FailureQueue;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting plexer event router");

    // Configuration failures exit non-zero before anything is armed.
    let config = Config::load()?;
    let addr = config.server_addr()?;
    let registry = Arc::new(config.consumer_registry()?);
    info!(
        addr = %addr,
        environment = %config.node_env,
        data_dir = %config.data_dir().display(),
        consumers = registry.len(),
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let metrics = DeliveryMetrics::new();
    let queue = Arc::new(FailureQueue::new(config.data_dir(), metrics.clone(), clock.clone()));

    // Crash recovery must finish before the retry worker is armed so a
    // reattached snapshot is never raced by a concurrent claim.
    let recovered = queue.recover_orphans().await.context("crash recovery failed")?;
    if recovered > 0 {
        info!(recovered, "Reattached orphaned processing files");
    }
    let scan = queue.scan_metrics().await.context("initial queue scan failed")?;
    info!(failed = scan.failed, retryable_now = scan.retryable_now, "Failure queue scanned");

    let client = ForwardClient::new(config.client_config())?;
    let in_flight = InFlight::new();
    let dispatcher = Arc::new(FanoutDispatcher::new(
        registry.clone(),
        client.clone(),
        queue.clone(),
        metrics.clone(),
        in_flight.clone(),
    ));

    let cancel = CancellationToken::new();
    let worker = RetryWorker::new(
        queue,
        registry,
        client,
        metrics.clone(),
        clock,
        config.retry_config(),
        cancel.clone(),
    );
    let worker_handle = tokio::spawn(worker.run());

    let state = AppState {
        dispatcher,
        metrics,
        in_flight: in_flight.clone(),
        environment: config.node_env.clone(),
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "Plexer is ready to receive events");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    info!("Ingress stopped, shutting down delivery");

    // Stop scheduling retries, then give in-flight fanout a bounded window.
    cancel.cancel();
    if let Err(e) = worker_handle.await {
        error!(error = %e, "retry worker task failed during shutdown");
    }

    match in_flight.drain(config.drain_timeout()).await {
        DrainOutcome::Complete => info!("In-flight fanout drained"),
        DrainOutcome::TimedOut { remaining } => {
            // Any pending critical failure was appended to the queue inside
            // the response handler of the downstream call, so exiting loses
            // nothing durable.
            warn!(remaining, "Drain timeout elapsed with calls still in flight");
        },
    }

    info!("Plexer shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,plexer=debug,tower_http=debug"))
        .expect("Invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
