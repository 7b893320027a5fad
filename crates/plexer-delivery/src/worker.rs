//! The retry worker.
//!
//! A single logical worker that never overlaps itself. Each tick claims the
//! queue by renaming it to a processing snapshot, attempts the due entries
//! with bounded concurrency, appends the survivors back, and only then
//! unlinks the snapshot. A tick that dies mid-stream leaves the snapshot
//! behind for next-boot recovery.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use plexer_core::{Clock, ConsumerRegistry, DeliveryMetrics, QueueScan};
use plexer_queue::{FailedForward, FailureQueue, QueueError};
use rand::Rng;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::Semaphore,
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::ForwardClient;

/// Shortest pause between ticks.
const MIN_TICK: Duration = Duration::from_secs(5);

/// Longest pause between ticks.
const MAX_TICK: Duration = Duration::from_secs(60);

/// Tick jitter half-width in milliseconds.
const TICK_JITTER_MILLIS: i64 = 1_000;

/// Tuning knobs for the retry worker.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum concurrent retry POSTs per tick.
    pub concurrency: usize,
    /// Entries processed per chunk, bounding the survivor accumulator.
    pub batch_size: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            concurrency: crate::DEFAULT_RETRY_CONCURRENCY,
            batch_size: crate::DEFAULT_RETRY_BATCH_SIZE,
        }
    }
}

/// Periodic retry worker over the failure queue.
pub struct RetryWorker {
    queue: Arc<FailureQueue>,
    registry: Arc<ConsumerRegistry>,
    client: ForwardClient,
    metrics: DeliveryMetrics,
    clock: Arc<dyn Clock>,
    config: RetryConfig,
    cancel: CancellationToken,
}

/// State shared with the per-entry attempt tasks.
#[derive(Clone)]
struct AttemptContext {
    registry: Arc<ConsumerRegistry>,
    client: ForwardClient,
    metrics: DeliveryMetrics,
    clock: Arc<dyn Clock>,
}

impl RetryWorker {
    /// Creates a retry worker; call [`RetryWorker::run`] to arm it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<FailureQueue>,
        registry: Arc<ConsumerRegistry>,
        client: ForwardClient,
        metrics: DeliveryMetrics,
        clock: Arc<dyn Clock>,
        config: RetryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self { queue, registry, client, metrics, clock, config, cancel }
    }

    /// Runs ticks until the cancellation token fires.
    ///
    /// Tick errors are logged, never propagated; the next tick starts on
    /// schedule regardless.
    pub async fn run(self) {
        info!(
            concurrency = self.config.concurrency,
            batch_size = self.config.batch_size,
            "retry worker started"
        );

        loop {
            let delay = self.next_tick_delay();
            tokio::select! {
                () = self.clock.sleep(delay) => {},
                () = self.cancel.cancelled() => break,
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "retry cycle failed");
            }
        }

        info!("retry worker stopped");
    }

    /// Computes the pause before the next tick:
    /// `clamp(next_due_at - now, 5s, 60s)` plus up to a second of jitter in
    /// either direction, floor-clamped to the minimum tick.
    fn next_tick_delay(&self) -> Duration {
        let until_due = self
            .metrics
            .snapshot()
            .next_due_at
            .map(|due| due.signed_duration_since(self.clock.now_utc()).to_std().unwrap_or_default())
            .unwrap_or(MAX_TICK);
        let base = until_due.clamp(MIN_TICK, MAX_TICK);

        let jitter = rand::rng().random_range(-TICK_JITTER_MILLIS..=TICK_JITTER_MILLIS);
        let millis = (base.as_millis() as i64 + jitter).max(MIN_TICK.as_millis() as i64);
        Duration::from_millis(millis as u64)
    }

    /// Executes one retry cycle.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when the claim, the processing-file read, or
    /// the survivor persistence fails. A persistence failure leaves the
    /// processing file in place for crash recovery.
    pub async fn tick(&self) -> Result<(), QueueError> {
        let Some(claim) = self.queue.claim_batch().await? else {
            return Ok(());
        };

        let file = tokio::fs::File::open(claim.path())
            .await
            .map_err(|e| QueueError::io(claim.path(), e))?;
        let mut lines = BufReader::new(file).lines();

        let mut survivors: Vec<FailedForward> = Vec::new();
        let mut chunk: Vec<FailedForward> = Vec::with_capacity(self.config.batch_size);
        while let Some(line) =
            lines.next_line().await.map_err(|e| QueueError::io(claim.path(), e))?
        {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FailedForward>(&line) {
                Ok(entry) => chunk.push(entry),
                Err(e) => {
                    warn!(error = %e, "skipping unparsable queue entry");
                    continue;
                },
            }
            if chunk.len() >= self.config.batch_size.max(1) {
                let full = std::mem::take(&mut chunk);
                survivors.extend(self.attempt_chunk(full).await);
            }
        }
        if !chunk.is_empty() {
            survivors.extend(self.attempt_chunk(chunk).await);
        }

        self.queue.finish_cycle(claim, &survivors).await?;

        let now = self.clock.now_utc();
        self.metrics.finish_tick(scan_survivors(&survivors, now), now);
        Ok(())
    }

    /// Attempts one chunk of entries under the concurrency bound, returning
    /// the survivors in file order.
    async fn attempt_chunk(&self, chunk: Vec<FailedForward>) -> Vec<FailedForward> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let context = AttemptContext {
            registry: self.registry.clone(),
            client: self.client.clone(),
            metrics: self.metrics.clone(),
            clock: self.clock.clone(),
        };

        let mut tasks = JoinSet::new();
        for (index, entry) in chunk.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let context = context.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    // Semaphore is never closed; keep the entry if it ever is.
                    return (index, Some(entry));
                };
                (index, attempt_entry(&context, entry).await)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "retry attempt task panicked"),
            }
        }
        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().filter_map(|(_, survivor)| survivor).collect()
    }
}

/// Attempts one entry; returns it (rescheduled) if it must survive.
async fn attempt_entry(context: &AttemptContext, mut entry: FailedForward) -> Option<FailedForward> {
    // One clock reading per entry, shared by the due check, lastAttempt,
    // and the backoff base.
    let now = context.clock.now_utc();

    if !entry.is_due(now) {
        return Some(entry);
    }

    let Some(consumer) = context.registry.get(&entry.consumer_key) else {
        let message = "Consumer configuration missing";
        warn!(consumer_key = %entry.consumer_key, "queued entry targets an unknown consumer");
        context.metrics.record_attempt_error(message);
        entry.record_failure(now, message);
        return Some(entry);
    };

    let Some(url) = consumer.url.clone() else {
        let message = "Consumer URL missing";
        warn!(consumer_key = %entry.consumer_key, "queued entry targets a consumer without a URL");
        context.metrics.record_attempt_error(message);
        entry.record_failure(now, message);
        return Some(entry);
    };

    match context.client.forward(consumer, &url, &entry.event).await {
        Ok(receipt) => {
            info!(
                label = %consumer.label,
                event_type = %entry.event.event_type,
                status = receipt.status,
                retry_count = entry.retry_count,
                "queued event delivered"
            );
            None
        },
        Err(err) => {
            let message = err.forward_message();
            warn!(
                label = %consumer.label,
                event_type = %entry.event.event_type,
                status = err.status_code(),
                error = %message,
                "retry attempt failed"
            );
            context.metrics.record_attempt_error(&message);
            entry.record_failure(now, &message);
            Some(entry)
        },
    }
}

/// Derives the post-tick counters from the persisted survivors.
fn scan_survivors(survivors: &[FailedForward], now: DateTime<Utc>) -> QueueScan {
    let mut scan = QueueScan { failed: survivors.len() as u64, ..QueueScan::default() };
    for entry in survivors {
        if entry.is_due(now) {
            scan.retryable_now += 1;
        }
        if scan.next_due_at.is_none_or(|due| entry.next_attempt < due) {
            scan.next_due_at = Some(entry.next_attempt);
        }
    }
    scan
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use plexer_core::{AuthKind, Consumer, Envelope, RealClock};
    use plexer_queue::store::load_entries;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::{
        matchers::{body_json, method},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn envelope() -> Envelope {
        Envelope {
            event_type: "knowledge.observatory.published.v1".to_string(),
            source: "semantAH".to_string(),
            payload: json!({"url": "https://example.test"}),
        }
    }

    fn consumer(url: Option<String>) -> Consumer {
        Consumer {
            key: "heimgeist".to_string(),
            label: "Heimgeist".to_string(),
            url,
            token: None,
            auth_kind: AuthKind::Bearer,
        }
    }

    struct Harness {
        dir: TempDir,
        queue: Arc<FailureQueue>,
        metrics: DeliveryMetrics,
        worker: RetryWorker,
    }

    fn harness(registry: ConsumerRegistry) -> Harness {
        let dir = TempDir::new().unwrap();
        let metrics = DeliveryMetrics::new();
        let clock: Arc<dyn Clock> = Arc::new(RealClock);
        let queue = Arc::new(FailureQueue::new(dir.path(), metrics.clone(), clock.clone()));
        let worker = RetryWorker::new(
            queue.clone(),
            Arc::new(registry),
            ForwardClient::with_defaults().unwrap(),
            metrics.clone(),
            clock,
            RetryConfig::default(),
            CancellationToken::new(),
        );
        Harness { dir, queue, metrics, worker }
    }

    async fn preload_due_entry(harness: &Harness, error: &str) {
        let mut entry = FailedForward::new(envelope(), "heimgeist", error, Utc::now());
        entry.next_attempt = Utc::now() - ChronoDuration::seconds(1);
        harness.queue.ensure_layout().await.unwrap();
        let line = format!("{}\n", serde_json::to_string(&entry).unwrap());
        tokio::fs::write(harness.queue.queue_path(), line).await.unwrap();
    }

    fn processing_files(dir: &TempDir) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("processing."))
            })
            .collect()
    }

    #[tokio::test]
    async fn due_entry_delivered_and_removed_from_queue() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({
                "type": "knowledge.observatory.published.v1",
                "source": "semantAH",
                "payload": {"url": "https://example.test"}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let harness = harness(ConsumerRegistry::new(vec![consumer(Some(server.uri()))]));
        preload_due_entry(&harness, "connection refused").await;

        harness.worker.tick().await.unwrap();

        let contents =
            tokio::fs::read_to_string(harness.queue.queue_path()).await.unwrap();
        assert!(contents.is_empty(), "delivered entry should be gone");
        assert!(processing_files(&harness.dir).is_empty(), "processing file should be unlinked");
        assert_eq!(harness.metrics.snapshot().failed, 0);
        assert!(harness.metrics.snapshot().last_retry_at.is_some());
        server.verify().await;
    }

    #[tokio::test]
    async fn failed_retry_survives_with_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let harness = harness(ConsumerRegistry::new(vec![consumer(Some(server.uri()))]));
        preload_due_entry(&harness, "first failure").await;

        let before = Utc::now();
        harness.worker.tick().await.unwrap();

        let survivors = load_entries(&harness.queue.queue_path()).await.unwrap();
        assert_eq!(survivors.len(), 1);
        let survivor = &survivors[0];
        assert_eq!(survivor.retry_count, 1);
        assert!(survivor.next_attempt > Utc::now(), "rescheduled into the future");
        assert!(survivor.last_attempt >= before);
        assert!(survivor.last_attempt <= Utc::now());
        assert_eq!(survivor.error, "request failed with status 500");
        assert!(processing_files(&harness.dir).is_empty());

        let snapshot = harness.metrics.snapshot();
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.retryable_now, 0);
        assert_eq!(snapshot.next_due_at, Some(survivor.next_attempt));
    }

    #[tokio::test]
    async fn not_yet_due_entry_survives_unchanged() {
        let harness = harness(ConsumerRegistry::new(vec![consumer(None)]));

        let mut entry = FailedForward::new(envelope(), "heimgeist", "waiting", Utc::now());
        entry.next_attempt = Utc::now() + ChronoDuration::seconds(600);
        harness.queue.ensure_layout().await.unwrap();
        let line = format!("{}\n", serde_json::to_string(&entry).unwrap());
        tokio::fs::write(harness.queue.queue_path(), line).await.unwrap();

        harness.worker.tick().await.unwrap();

        let survivors = load_entries(&harness.queue.queue_path()).await.unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0], entry, "no attempt means no mutation");
    }

    #[tokio::test]
    async fn unknown_consumer_is_rescheduled_with_config_error() {
        let harness = harness(ConsumerRegistry::new(vec![]));
        preload_due_entry(&harness, "queued before redeploy").await;

        harness.worker.tick().await.unwrap();

        let survivors = load_entries(&harness.queue.queue_path()).await.unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].error, "Consumer configuration missing");
        assert_eq!(survivors[0].retry_count, 1);
    }

    #[tokio::test]
    async fn consumer_without_url_is_rescheduled_with_url_error() {
        let harness = harness(ConsumerRegistry::new(vec![consumer(None)]));
        preload_due_entry(&harness, "queued before url removed").await;

        harness.worker.tick().await.unwrap();

        let survivors = load_entries(&harness.queue.queue_path()).await.unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].error, "Consumer URL missing");
    }

    #[tokio::test]
    async fn unparsable_lines_are_dropped_during_the_cycle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let harness = harness(ConsumerRegistry::new(vec![consumer(Some(server.uri()))]));

        let mut entry = FailedForward::new(envelope(), "heimgeist", "refused", Utc::now());
        entry.next_attempt = Utc::now() - ChronoDuration::seconds(1);
        harness.queue.ensure_layout().await.unwrap();
        let contents = format!("garbage line\n{}\n", serde_json::to_string(&entry).unwrap());
        tokio::fs::write(harness.queue.queue_path(), contents).await.unwrap();

        harness.worker.tick().await.unwrap();

        let remaining =
            tokio::fs::read_to_string(harness.queue.queue_path()).await.unwrap();
        assert!(remaining.is_empty(), "garbage is dropped, the real entry delivered");
    }

    #[tokio::test]
    async fn empty_queue_tick_is_a_no_op() {
        let harness = harness(ConsumerRegistry::new(vec![consumer(None)]));
        harness.metrics.record_enqueued("stale counter", Utc::now());

        harness.worker.tick().await.unwrap();

        assert_eq!(harness.metrics.snapshot().failed, 0, "counters zeroed on empty queue");
        assert!(processing_files(&harness.dir).is_empty());
    }

    #[tokio::test]
    async fn cancelled_worker_stops_promptly() {
        let harness = harness(ConsumerRegistry::new(vec![consumer(None)]));
        let cancel = harness.worker.cancel.clone();

        let handle = tokio::spawn(harness.worker.run());
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop after cancellation")
            .unwrap();
    }

    #[test]
    fn tick_delay_is_clamped_with_jitter() {
        let harness = harness(ConsumerRegistry::new(vec![consumer(None)]));

        // Empty queue: delay orbits the maximum tick.
        for _ in 0..10 {
            let delay = harness.worker.next_tick_delay();
            assert!(delay >= MAX_TICK - Duration::from_millis(TICK_JITTER_MILLIS as u64));
            assert!(delay <= MAX_TICK + Duration::from_millis(TICK_JITTER_MILLIS as u64));
        }

        // Imminently due work: delay floors at the minimum tick.
        harness.metrics.record_enqueued("due soon", Utc::now());
        for _ in 0..10 {
            let delay = harness.worker.next_tick_delay();
            assert!(delay >= MIN_TICK);
            assert!(delay <= MIN_TICK + Duration::from_millis(TICK_JITTER_MILLIS as u64));
        }
    }
}
