//! Shared utilities for integration and load testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::watch;

use resilient_sync::config::SyncConfig;
use resilient_sync::queue::{OperationExecutor, QueuedOperation};
use resilient_sync::{SyncError, SyncResult};

/// Config with millisecond backoff so retry paths finish quickly.
pub fn fast_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.retries.base_delay_ms = 1;
    config.retries.max_delay_ms = 5;
    config.retries.long_max_delay_ms = 5;
    config.cache.sweep_interval_secs = 0;
    config
}

/// A programmable backend for network operations.
///
/// Each call pops the next scripted outcome; once the script is exhausted
/// every call succeeds with the current value.
#[derive(Clone)]
pub struct MockBackend {
    value: Arc<Mutex<String>>,
    script: Arc<Mutex<VecDeque<SyncError>>>,
    calls: Arc<AtomicU32>,
}

#[allow(dead_code)]
impl MockBackend {
    pub fn new(value: &str) -> Self {
        Self {
            value: Arc::new(Mutex::new(value.to_string())),
            script: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Fail the next `times` calls with the given fault marker.
    pub fn fail_next(&self, times: usize, marker: &str) {
        let mut script = self.script.lock().unwrap();
        for _ in 0..times {
            script.push_back(SyncError::remote(marker, "scripted failure"));
        }
    }

    pub fn set_value(&self, value: &str) {
        *self.value.lock().unwrap() = value.to_string();
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn call(&self) -> SyncResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.script.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self.value.lock().unwrap().clone())
    }

    /// A network operation suitable for `FetchRequest::new`.
    pub fn op(
        &self,
    ) -> impl Fn() -> BoxFuture<'static, SyncResult<String>> + Send + Sync + 'static {
        let backend = self.clone();
        move || {
            let backend = backend.clone();
            Box::pin(async move { backend.call().await })
        }
    }
}

/// Operation executor that records replay order and fails scripted ids.
#[derive(Default)]
pub struct RecordingExecutor {
    pub calls: Mutex<Vec<String>>,
    failing: Mutex<Vec<(String, String)>>,
    gate: Mutex<Option<watch::Receiver<bool>>>,
}

#[allow(dead_code)]
impl RecordingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every replay of `resource_id` with the given fault marker.
    pub fn fail(&self, resource_id: &str, marker: &str) {
        self.failing
            .lock()
            .unwrap()
            .push((resource_id.to_string(), marker.to_string()));
    }

    pub fn heal(&self, resource_id: &str) {
        self.failing.lock().unwrap().retain(|(id, _)| id != resource_id);
    }

    /// Block executions until the returned sender publishes `true`.
    pub fn hold(&self) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn replayed(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperationExecutor for RecordingExecutor {
    async fn execute(&self, operation: &QueuedOperation) -> SyncResult<()> {
        let id = operation.resource_id.clone().unwrap_or_default();
        self.calls.lock().unwrap().push(id.clone());

        let gate = self.gate.lock().unwrap().clone();
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }

        let failure = self
            .failing
            .lock()
            .unwrap()
            .iter()
            .find(|(failing, _)| *failing == id)
            .map(|(_, marker)| marker.clone());
        match failure {
            Some(marker) => Err(SyncError::remote(&marker, "scripted replay failure")),
            None => Ok(()),
        }
    }
}

/// Poll `check` until it holds or `timeout` elapses.
#[allow(dead_code)]
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
