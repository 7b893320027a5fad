//! Fanout dispatcher for accepted events.
//!
//! For one validated envelope, walks the consumer registry and POSTs to
//! every consumer the policy matrix selects, concurrently and detached from
//! the ingress response. Failures for a critical (consumer, type) pair are
//! handed to the durable queue; best-effort failures are logged and
//! dropped.

use std::sync::Arc;

use plexer_core::{route, Consumer, ConsumerRegistry, DeliveryMetrics, Envelope, Route};
use plexer_queue::FailureQueue;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    client::ForwardClient,
    inflight::{InFlight, InFlightGuard},
};

/// Dispatches accepted events to their consumers.
///
/// Cloning is cheap; all state is shared.
#[derive(Clone)]
pub struct FanoutDispatcher {
    registry: Arc<ConsumerRegistry>,
    client: ForwardClient,
    queue: Arc<FailureQueue>,
    metrics: DeliveryMetrics,
    in_flight: InFlight,
}

impl FanoutDispatcher {
    /// Creates a dispatcher over the given registry and queue.
    pub fn new(
        registry: Arc<ConsumerRegistry>,
        client: ForwardClient,
        queue: Arc<FailureQueue>,
        metrics: DeliveryMetrics,
        in_flight: InFlight,
    ) -> Self {
        Self { registry, client, queue, metrics, in_flight }
    }

    /// Handle to the in-flight gauge, for `pending` reporting and drain.
    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }

    /// Fans one event out to every selected consumer.
    ///
    /// Returns as soon as the delivery tasks are spawned; the caller never
    /// waits on a downstream response. Each spawned call is registered in
    /// the in-flight gauge before this method returns.
    pub fn dispatch(&self, envelope: Envelope) {
        let event_id = Uuid::new_v4();

        for consumer in self.registry.iter() {
            let decision = route(&envelope.event_type, &consumer.key);
            if !decision.forward {
                continue;
            }
            let Some(url) = consumer.url.clone() else {
                // No URL configured: skipped silently, mirrored at retry.
                continue;
            };

            let guard = self.in_flight.begin();
            let this = self.clone();
            let consumer = consumer.clone();
            let envelope = envelope.clone();
            tokio::spawn(async move {
                this.deliver_one(event_id, consumer, url, envelope, decision, guard).await;
            });
        }
    }

    async fn deliver_one(
        &self,
        event_id: Uuid,
        consumer: Consumer,
        url: String,
        envelope: Envelope,
        decision: Route,
        guard: InFlightGuard,
    ) {
        match self.client.forward(&consumer, &url, &envelope).await {
            Ok(receipt) => {
                if let Some(repo) = envelope.repo() {
                    info!(
                        event_id = %event_id,
                        publisher = %envelope.source,
                        delivered_to = %consumer.key,
                        status_code = receipt.status,
                        repo = %repo,
                        "event forwarded"
                    );
                } else {
                    info!(
                        event_id = %event_id,
                        publisher = %envelope.source,
                        delivered_to = %consumer.key,
                        status_code = receipt.status,
                        "event forwarded"
                    );
                }
            },
            Err(err) => {
                let message = err.forward_message();
                if decision.queue_on_fail {
                    self.queue_failure(event_id, &consumer, &envelope, &message).await;
                } else {
                    warn!(
                        log_kind = "best_effort_forward_failed",
                        event_id = %event_id,
                        consumer = %consumer.label,
                        event_type = %envelope.event_type,
                        error = %message,
                        "best-effort forward failed, dropping"
                    );
                }
            },
        }
        drop(guard);
    }

    async fn queue_failure(
        &self,
        event_id: Uuid,
        consumer: &Consumer,
        envelope: &Envelope,
        message: &str,
    ) {
        match self.queue.save_failed_event(envelope, &consumer.key, message).await {
            Ok(()) => {
                error!(
                    event_id = %event_id,
                    consumer = %consumer.label,
                    event_type = %envelope.event_type,
                    error = %message,
                    "critical forward failed, queued for retry"
                );
            },
            Err(queue_error) => {
                // Dropping beats blocking the ingress; the loss is visible
                // through last_error.
                self.metrics.record_persistence_error(&queue_error.to_string());
                error!(
                    event_id = %event_id,
                    consumer = %consumer.label,
                    event_type = %envelope.event_type,
                    error = %queue_error,
                    "failed to queue critical forward, event dropped"
                );
            },
        }
    }
}
