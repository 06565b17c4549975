//! Persisted offline write queue.
//!
//! Writes made while offline are appended here, persisted whole after every
//! mutation, and replayed in FIFO order once connectivity returns.
//!
//! # Replay
//! - One drain at a time; a trigger while draining is a no-op.
//! - Connectivity is re-checked before every operation and the pass stops
//!   as soon as the device goes offline.
//! - The list lock is never held while an operation executes, so enqueues
//!   proceed during a drain and are picked up by the same pass. The pass
//!   gives up its claim under the list lock once nothing is left, so a
//!   later enqueue starts a fresh pass instead.
//! - Each operation is attempted at most once per pass. Every failure counts
//!   against its budget; an exhausted operation is removed and reported.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::operation::{OperationExecutor, OperationKind, QueueEvent, QueuedOperation};
use crate::config::QueueConfig;
use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::lifecycle::CancelToken;
use crate::observability::metrics;
use crate::observability::telemetry::{events, NoopSink, TelemetrySink};
use crate::resilience::{BackoffPolicy, RetryExecutor};
use crate::storage::PersistedStore;

const EVENT_CAPACITY: usize = 256;

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Another drain was already running, or the device was offline.
    pub skipped: bool,
    /// The pass stopped early (connectivity lost or cancelled).
    pub aborted: bool,
    pub replayed: usize,
    pub failed: usize,
    pub dropped: usize,
    /// Operations still queued when the pass ended.
    pub remaining: usize,
}

/// Clears the draining flag when a pass ends, however it ends.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
    released: bool,
}

impl<'a> DrainGuard<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        Self { flag, released: false }
    }

    /// Clear the flag now. Later calls and the drop are no-ops, so a pass
    /// started after this point keeps its own claim.
    fn release(&mut self) {
        if !self.released {
            self.flag.store(false, Ordering::Release);
            self.released = true;
        }
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct OfflineQueue {
    operations: Mutex<Vec<QueuedOperation>>,
    store: Arc<dyn PersistedStore>,
    storage_key: String,
    default_max_attempts: u32,
    executor: Arc<dyn OperationExecutor>,
    policy: BackoffPolicy,
    connectivity: Connectivity,
    telemetry: Arc<dyn TelemetrySink>,
    events: broadcast::Sender<QueueEvent>,
    draining: AtomicBool,
    auto_drain: bool,
    cancel: Option<CancelToken>,
}

impl OfflineQueue {
    pub fn new(
        store: Arc<dyn PersistedStore>,
        executor: Arc<dyn OperationExecutor>,
        connectivity: Connectivity,
        config: &QueueConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            operations: Mutex::new(Vec::new()),
            store,
            storage_key: config.storage_key.clone(),
            default_max_attempts: config.max_attempts,
            executor,
            policy: BackoffPolicy::long_running(),
            connectivity,
            telemetry: Arc::new(NoopSink),
            events,
            draining: AtomicBool::new(false),
            auto_drain: true,
            cancel: None,
        }
    }

    /// Retry policy wrapped around each replay attempt.
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    /// Whether `enqueue` starts a background drain when online.
    pub fn with_auto_drain(mut self, enabled: bool) -> Self {
        self.auto_drain = enabled;
        self
    }

    /// Token that stops drain passes and their retry sleeps.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Replace in-memory state with the persisted queue. Returns the number
    /// of operations loaded.
    pub async fn load(&self) -> SyncResult<usize> {
        let loaded: Vec<QueuedOperation> = match self.store.get(&self.storage_key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        };
        let count = loaded.len();
        *self.operations.lock().await = loaded;
        metrics::record_queue_depth(count);
        tracing::info!(pending = count, key = %self.storage_key, "Offline queue loaded");
        Ok(count)
    }

    /// Load persisted state and, if online, replay it before returning.
    pub async fn restore(&self) -> SyncResult<DrainReport> {
        self.load().await?;
        Ok(self.drain().await)
    }

    /// Append an operation and persist the queue.
    ///
    /// If persisting fails the append is rolled back and the error returned,
    /// so a returned id always refers to a durable entry. When online a drain
    /// is started in the background.
    pub async fn enqueue(
        self: &Arc<Self>,
        kind: OperationKind,
        resource_kind: impl Into<String>,
        resource_id: Option<String>,
        payload: serde_json::Value,
        max_attempts: Option<u32>,
    ) -> SyncResult<Uuid> {
        let operation = QueuedOperation::new(
            kind,
            resource_kind,
            resource_id,
            payload,
            max_attempts.unwrap_or(self.default_max_attempts),
        );
        let id = operation.id;

        {
            let mut operations = self.operations.lock().await;
            operations.push(operation.clone());
            if let Err(e) = self.persist(&operations).await {
                operations.pop();
                tracing::error!(
                    error = %e,
                    operation = %operation.describe(),
                    "Failed to persist queued operation"
                );
                return Err(e);
            }
            metrics::record_queue_depth(operations.len());
        }

        tracing::info!(id = %id, operation = %operation.describe(), "Operation queued");
        self.telemetry.record_event(
            events::QUEUE_ENQUEUED,
            &[
                ("operation_id", id.to_string()),
                ("kind", kind.as_str().to_string()),
                ("resource_kind", operation.resource_kind.clone()),
            ],
        );
        let _ = self.events.send(QueueEvent::Enqueued(operation));

        if self.auto_drain {
            self.trigger_drain();
        }
        Ok(id)
    }

    /// Start a background drain if online and none is running.
    pub fn trigger_drain(self: &Arc<Self>) -> Option<JoinHandle<DrainReport>> {
        if !self.connectivity.is_online() || self.is_draining() {
            return None;
        }
        let queue = Arc::clone(self);
        Some(tokio::spawn(async move { queue.drain().await }))
    }

    /// Replay queued operations in FIFO order.
    pub async fn drain(&self) -> DrainReport {
        if !self.connectivity.is_online() {
            tracing::debug!("Offline, skipping drain");
            return DrainReport {
                skipped: true,
                remaining: self.len().await,
                ..Default::default()
            };
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Drain already running");
            return DrainReport {
                skipped: true,
                ..Default::default()
            };
        }
        let mut guard = DrainGuard::new(&self.draining);

        let started = Instant::now();
        let mut report = DrainReport::default();
        let mut attempted: HashSet<Uuid> = HashSet::new();

        loop {
            if !self.connectivity.is_online() {
                tracing::info!("Connectivity lost, stopping drain");
                report.aborted = true;
                break;
            }
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                report.aborted = true;
                break;
            }

            let next = {
                let operations = self.operations.lock().await;
                let next = operations.iter().find(|op| !attempted.contains(&op.id)).cloned();
                if next.is_none() {
                    // Released under the list lock: any later enqueue sees
                    // no drain running and starts its own.
                    guard.release();
                }
                next
            };
            let Some(operation) = next else { break };
            attempted.insert(operation.id);

            match self.replay(&operation).await {
                Ok(()) => {
                    self.complete(&operation).await;
                    report.replayed += 1;
                }
                Err(e) if e.is_cancelled() => {
                    tracing::debug!(id = %operation.id, "Drain cancelled");
                    report.aborted = true;
                    break;
                }
                Err(e) => {
                    if self.record_failure(&operation, e).await {
                        report.dropped += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }

        report.remaining = self.len().await;
        metrics::record_drain_duration(started.elapsed());
        if report.replayed + report.failed + report.dropped > 0 {
            tracing::info!(
                replayed = report.replayed,
                failed = report.failed,
                dropped = report.dropped,
                remaining = report.remaining,
                "Drain pass finished"
            );
        }
        report
    }

    async fn replay(&self, operation: &QueuedOperation) -> SyncResult<()> {
        let mut retry = RetryExecutor::new(self.policy)
            .with_label(format!("replay:{}", operation.kind))
            .with_telemetry(self.telemetry.clone());
        if let Some(token) = &self.cancel {
            retry = retry.with_cancel(token.clone());
        }
        let executor = &self.executor;
        retry.execute(|| executor.execute(operation)).await
    }

    async fn complete(&self, operation: &QueuedOperation) {
        {
            let mut operations = self.operations.lock().await;
            operations.retain(|op| op.id != operation.id);
            self.persist_logged(&operations).await;
        }

        tracing::debug!(
            id = %operation.id,
            operation = %operation.describe(),
            "Operation replayed"
        );
        metrics::record_queue_replay("success");
        self.telemetry.record_event(
            events::QUEUE_REPLAYED,
            &[("operation_id", operation.id.to_string())],
        );
        let _ = self.events.send(QueueEvent::Replayed(operation.clone()));
    }

    /// Count a failed attempt. Returns true if the operation was dropped.
    async fn record_failure(&self, operation: &QueuedOperation, error: SyncError) -> bool {
        let updated = {
            let mut operations = self.operations.lock().await;
            let Some(index) = operations.iter().position(|op| op.id == operation.id) else {
                // Removed while executing.
                return false;
            };
            operations[index].attempts += 1;
            let updated = operations[index].clone();
            if updated.is_exhausted() {
                operations.remove(index);
            }
            self.persist_logged(&operations).await;
            updated
        };

        let attributes = [
            ("operation_id", updated.id.to_string()),
            ("kind", updated.kind.as_str().to_string()),
            ("attempts", updated.attempts.to_string()),
        ];

        if updated.is_exhausted() {
            let failure = updated.permanent_failure(&error);
            tracing::error!(
                id = %updated.id,
                operation = %updated.describe(),
                attempts = updated.attempts,
                error = %error,
                "Queued operation failed permanently"
            );
            metrics::record_queue_replay("dropped");
            self.telemetry
                .record_error(events::QUEUE_PERMANENT_FAILURE, &failure, &attributes);
            let _ = self.events.send(QueueEvent::PermanentFailure {
                operation: updated,
                error: failure,
            });
            true
        } else {
            tracing::warn!(
                id = %updated.id,
                operation = %updated.describe(),
                attempts = updated.attempts,
                max_attempts = updated.max_attempts,
                error = %error,
                "Queued operation failed, will retry"
            );
            metrics::record_queue_replay("failed");
            self.telemetry
                .record_error(events::QUEUE_ATTEMPT_FAILED, &error, &attributes);
            let _ = self.events.send(QueueEvent::AttemptFailed {
                operation: updated,
                error,
            });
            false
        }
    }

    /// Remove and return every queued operation.
    pub async fn dequeue_all(&self) -> SyncResult<Vec<QueuedOperation>> {
        let mut operations = self.operations.lock().await;
        let taken = std::mem::take(&mut *operations);
        if let Err(e) = self.persist(&operations).await {
            *operations = taken;
            return Err(e);
        }
        metrics::record_queue_depth(0);
        Ok(taken)
    }

    /// Snapshot of queued operations in replay order.
    pub async fn pending(&self) -> Vec<QueuedOperation> {
        self.operations.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.operations.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.operations.lock().await.is_empty()
    }

    pub async fn get(&self, id: Uuid) -> Option<QueuedOperation> {
        self.operations.lock().await.iter().find(|op| op.id == id).cloned()
    }

    /// Drop a queued operation without replaying it.
    pub async fn remove(&self, id: Uuid) -> SyncResult<Option<QueuedOperation>> {
        let mut operations = self.operations.lock().await;
        let Some(index) = operations.iter().position(|op| op.id == id) else {
            return Ok(None);
        };
        let removed = operations.remove(index);
        if let Err(e) = self.persist(&operations).await {
            operations.insert(index, removed);
            return Err(e);
        }
        metrics::record_queue_depth(operations.len());
        Ok(Some(removed))
    }

    pub async fn clear(&self) -> SyncResult<()> {
        self.dequeue_all().await.map(|dropped| {
            tracing::info!(dropped = dropped.len(), "Offline queue cleared");
        })
    }

    /// Drain whenever connectivity comes back, until shutdown.
    pub fn spawn_listener(self: &Arc<Self>, shutdown: CancelToken) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let mut online = self.connectivity.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = online.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let is_online = *online.borrow_and_update();
                        if is_online {
                            queue.drain().await;
                        }
                    }
                    _ = shutdown.cancelled() => {
                        tracing::info!("Queue listener received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }

    async fn persist(&self, operations: &[QueuedOperation]) -> SyncResult<()> {
        let bytes = serde_json::to_vec(operations)?;
        self.store.put(&self.storage_key, bytes).await
    }

    /// Persist from a background path: failures are logged, and the next
    /// mutation writes the full list again.
    async fn persist_logged(&self, operations: &[QueuedOperation]) {
        if let Err(e) = self.persist(operations).await {
            tracing::error!(error = %e, "Failed to persist offline queue");
        }
        metrics::record_queue_depth(operations.len());
    }
}
