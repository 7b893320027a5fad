//! Isolated test environment with a temporary data directory.
//!
//! Each environment owns its own data dir, metrics handle, and virtual
//! clock, so tests can run in parallel without sharing queue files.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use plexer_core::{AuthKind, Clock, Consumer, DeliveryMetrics, Envelope};
use plexer_queue::{FailedForward, FailureQueue, QUEUE_FILE};
use tempfile::TempDir;

use crate::time::TestClock;

/// Self-contained fixture for queue and delivery tests.
pub struct TestEnv {
    data_dir: TempDir,
    /// Virtual clock shared with components built from this environment.
    pub clock: TestClock,
    /// Metrics handle shared with components built from this environment.
    pub metrics: DeliveryMetrics,
}

impl TestEnv {
    /// Creates an environment with a fresh temporary data directory.
    pub fn new() -> Self {
        Self {
            data_dir: TempDir::new().expect("failed to create temp data dir"),
            clock: TestClock::new(),
            metrics: DeliveryMetrics::new(),
        }
    }

    /// Path of the temporary data directory.
    pub fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    /// Path of the durable queue file.
    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.path().join(QUEUE_FILE)
    }

    /// Builds a queue handle over this environment's data dir and clock.
    pub fn queue(&self) -> FailureQueue {
        FailureQueue::new(
            self.data_dir.path(),
            self.metrics.clone(),
            Arc::new(self.clock.clone()) as Arc<dyn Clock>,
        )
    }

    /// Builds an `Arc`-wrapped queue handle.
    pub fn queue_arc(&self) -> Arc<FailureQueue> {
        Arc::new(self.queue())
    }

    /// Appends entries directly to the queue file, bypassing the lock.
    ///
    /// For preloading fixtures only; production writes go through the
    /// queue.
    pub fn preload_queue(&self, entries: &[FailedForward]) {
        let mut contents = String::new();
        for entry in entries {
            contents.push_str(&serde_json::to_string(entry).expect("entry should serialize"));
            contents.push('\n');
        }
        append(&self.queue_path(), &contents);
    }

    /// Writes a processing file as a crashed retry cycle would leave it.
    pub fn preload_processing_file(&self, name: &str, entries: &[FailedForward]) {
        let mut contents = String::new();
        for entry in entries {
            contents.push_str(&serde_json::to_string(entry).expect("entry should serialize"));
            contents.push('\n');
        }
        std::fs::write(self.data_dir.path().join(name), contents)
            .expect("failed to write processing file");
    }

    /// Reads the queue file's lines.
    pub fn queue_lines(&self) -> Vec<String> {
        std::fs::read_to_string(self.queue_path())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

fn append(path: &Path, contents: &str) {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("failed to create data dir");
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("failed to open queue file");
    file.write_all(contents.as_bytes()).expect("failed to append to queue file");
}

/// Builds an envelope fixture.
pub fn envelope(event_type: &str, source: &str, payload: serde_json::Value) -> Envelope {
    Envelope { event_type: event_type.to_string(), source: source.to_string(), payload }
}

/// Builds a consumer fixture.
pub fn consumer(
    key: &str,
    url: Option<String>,
    token: Option<&str>,
    auth_kind: AuthKind,
) -> Consumer {
    Consumer {
        key: key.to_string(),
        label: key.to_string(),
        url,
        token: token.map(str::to_string),
        auth_kind,
    }
}
