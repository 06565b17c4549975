//! Composition root.
//!
//! # Responsibilities
//! - Validate configuration and build every subsystem from it
//! - Share one persisted store, connectivity flag, and telemetry sink
//! - Start and stop background tasks (queue listener, sweeper, prober)
//! - Route writes: commit directly when online, queue otherwise
//!
//! # Design Decisions
//! - Fail fast: an invalid config is rejected at build time
//! - Only rate limit rules are hot-swappable; other settings need a rebuild

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::RecommendedWatcher;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::{CacheManager, CacheStore, CacheSweeper};
use crate::config::validation::validate_config;
use crate::config::watcher::ConfigWatcher;
use crate::config::{ConfigError, SyncConfig};
use crate::connectivity::{Connectivity, ConnectivityProbe, ConnectivityProber};
use crate::error::{SyncError, SyncResult};
use crate::lifecycle::Shutdown;
use crate::limits::{classes, RateLimiter};
use crate::observability::telemetry::{FanoutSink, MetricsSink, NoopSink, TelemetrySink};
use crate::queue::{DrainReport, OfflineQueue, OperationExecutor, OperationKind, QueuedOperation};
use crate::resilience::{BackoffPolicy, RetryExecutor};
use crate::storage::{FileStore, PersistedStore};

/// Result of [`SyncLayer::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The backend confirmed the write.
    Committed,
    /// The write is queued for replay; show it as pending.
    Pending(Uuid),
}

impl WriteOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, WriteOutcome::Pending(_))
    }
}

pub struct SyncLayerBuilder {
    config: SyncConfig,
    executor: Arc<dyn OperationExecutor>,
    store: Option<Arc<dyn PersistedStore>>,
    telemetry: Arc<dyn TelemetrySink>,
    connectivity: Connectivity,
    probe: Option<Arc<dyn ConnectivityProbe>>,
}

impl SyncLayerBuilder {
    /// Persisted store to use instead of a [`FileStore`] at the configured path.
    pub fn store(mut self, store: Arc<dyn PersistedStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    pub fn connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Probe used when `connectivity.probe_enabled` is set.
    pub fn probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn build(self) -> SyncResult<SyncLayer> {
        let config = self.config;
        check(&config)?;

        let store: Arc<dyn PersistedStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileStore::open(&config.storage.path)?),
        };

        let shutdown = Shutdown::new();
        let telemetry: Arc<dyn TelemetrySink> = if config.observability.metrics_enabled {
            Arc::new(FanoutSink::new(vec![self.telemetry, Arc::new(MetricsSink)]))
        } else {
            self.telemetry
        };
        let connectivity = self.connectivity;

        let limiter = Arc::new(
            RateLimiter::new(config.rate_limit.clone()).with_telemetry(telemetry.clone()),
        );

        let cache_store = Arc::new(CacheStore::new(store.clone(), config.cache.key_prefix.clone()));
        let cache = CacheManager::new(cache_store, limiter.clone())
            .with_policy(BackoffPolicy::from_config(&config.retries))
            .with_attempt_timeout(config.retries.attempt_timeout())
            .with_telemetry(telemetry.clone())
            .with_default_ttl(config.cache.default_ttl())
            .with_background_cancel(shutdown.subscribe());

        let queue = Arc::new(
            OfflineQueue::new(
                store.clone(),
                self.executor.clone(),
                connectivity.clone(),
                &config.queue,
            )
                .with_policy(BackoffPolicy::long_running_from_config(&config.retries))
                .with_telemetry(telemetry.clone())
                .with_cancel(shutdown.subscribe()),
        );

        tracing::info!(
            cache_prefix = %config.cache.key_prefix,
            queue_key = %config.queue.storage_key,
            rate_limit_enabled = config.rate_limit.enabled,
            "Sync layer built"
        );

        Ok(SyncLayer {
            config: Arc::new(ArcSwap::from_pointee(config)),
            store,
            connectivity,
            limiter,
            cache,
            queue,
            executor: self.executor,
            telemetry,
            probe: self.probe,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

/// The assembled resilience and synchronization layer.
pub struct SyncLayer {
    config: Arc<ArcSwap<SyncConfig>>,
    store: Arc<dyn PersistedStore>,
    connectivity: Connectivity,
    limiter: Arc<RateLimiter>,
    cache: CacheManager,
    queue: Arc<OfflineQueue>,
    executor: Arc<dyn OperationExecutor>,
    telemetry: Arc<dyn TelemetrySink>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    shutdown: Shutdown,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncLayer {
    pub fn builder(config: SyncConfig, executor: Arc<dyn OperationExecutor>) -> SyncLayerBuilder {
        SyncLayerBuilder {
            config,
            executor,
            store: None,
            telemetry: Arc::new(NoopSink),
            connectivity: Connectivity::default(),
            probe: None,
        }
    }

    /// Restore the offline queue and start background tasks.
    ///
    /// When `queue.drain_on_startup` is set and the device is online the
    /// restored queue is replayed before this returns.
    pub async fn start(&self) -> SyncResult<DrainReport> {
        let config = self.config.load_full();

        let report = if config.queue.drain_on_startup {
            self.queue.restore().await?
        } else {
            let pending = self.queue.load().await?;
            DrainReport {
                skipped: true,
                remaining: pending,
                ..Default::default()
            }
        };

        let mut handles = vec![self.queue.spawn_listener(self.shutdown.subscribe())];

        if config.cache.sweep_interval_secs > 0 {
            let sweeper = CacheSweeper::new(
                self.cache.store().clone(),
                Duration::from_secs(config.cache.sweep_interval_secs),
            );
            handles.push(tokio::spawn(sweeper.run(self.shutdown.subscribe())));
        }

        if config.connectivity.probe_enabled {
            match &self.probe {
                Some(probe) => {
                    let prober = ConnectivityProber::new(
                        probe.clone(),
                        self.connectivity.clone(),
                        &config.connectivity,
                    );
                    handles.push(tokio::spawn(prober.run(self.shutdown.subscribe())));
                }
                None => tracing::warn!("Connectivity probing enabled but no probe supplied"),
            }
        }

        self.track(handles);
        tracing::info!(
            online = self.connectivity.is_online(),
            pending = report.remaining,
            "Sync layer started"
        );
        Ok(report)
    }

    /// Stop background tasks and wait for them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.trigger();
        let handles = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        tracing::info!("Sync layer stopped");
    }

    /// Perform a write, or queue it when it cannot reach the backend.
    ///
    /// Offline writes are queued without an attempt. So are online writes
    /// while earlier operations are still queued, since they must replay
    /// first. Other online writes pass the `write` rate limit class and the
    /// retry executor; if they still fail with a transient fault they are
    /// queued too. Terminal failures are returned to the caller.
    pub async fn write(
        &self,
        kind: OperationKind,
        resource_kind: &str,
        resource_id: Option<String>,
        payload: serde_json::Value,
    ) -> SyncResult<WriteOutcome> {
        if !self.connectivity.is_online() {
            let id = self.queue.enqueue(kind, resource_kind, resource_id, payload, None).await?;
            return Ok(WriteOutcome::Pending(id));
        }
        if self.queue.is_draining() || !self.queue.is_empty().await {
            tracing::debug!(
                resource_kind = %resource_kind,
                "Earlier writes still queued, queueing behind them"
            );
            let id = self.queue.enqueue(kind, resource_kind, resource_id, payload, None).await?;
            return Ok(WriteOutcome::Pending(id));
        }

        let config = self.config.load_full();
        let operation = QueuedOperation::new(
            kind,
            resource_kind,
            resource_id.clone(),
            payload.clone(),
            config.queue.max_attempts,
        );
        let policy = BackoffPolicy::from_config(&config.retries);
        let retry = RetryExecutor::new(policy)
            .with_label(format!("write:{kind}"))
            .with_attempt_timeout(config.retries.attempt_timeout())
            .with_telemetry(self.telemetry.clone());

        let limiter = &self.limiter;
        let executor = &self.executor;
        let operation = &operation;
        let result = retry
            .execute(|| async move {
                limiter
                    .execute(classes::WRITE, || executor.execute(operation))
                    .await
            })
            .await;

        match result {
            Ok(()) => Ok(WriteOutcome::Committed),
            Err(e) if policy.classify(&e) => {
                tracing::warn!(
                    operation = %operation.describe(),
                    error = %e,
                    "Write failed transiently, queueing for replay"
                );
                let id = self.queue.enqueue(kind, resource_kind, resource_id, payload, None).await?;
                Ok(WriteOutcome::Pending(id))
            }
            Err(e) => Err(e),
        }
    }

    /// Swap in a new configuration. Rate limit rules apply immediately;
    /// other sections take effect on the next build.
    pub fn apply_config(&self, config: SyncConfig) -> SyncResult<()> {
        apply_to(&self.config, &self.limiter, config)
    }

    /// Reload configuration whenever `path` changes. Keep the returned
    /// watcher alive for as long as reloads are wanted.
    pub fn watch_config(&self, path: &Path) -> SyncResult<RecommendedWatcher> {
        let (watcher, mut updates) = ConfigWatcher::new(path);
        let watcher = watcher
            .run()
            .map_err(|e| SyncError::Config(format!("failed to watch {}: {e}", path.display())))?;

        let config = self.config.clone();
        let limiter = self.limiter.clone();
        let shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = updates.recv() => {
                        let Some(update) = update else { break };
                        if let Err(e) = apply_to(&config, &limiter, update) {
                            tracing::error!(error = %e, "Rejected reloaded configuration");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
        self.track(vec![handle]);
        Ok(watcher)
    }

    pub fn config(&self) -> Arc<SyncConfig> {
        self.config.load_full()
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn store(&self) -> &Arc<dyn PersistedStore> {
        &self.store
    }

    fn track(&self, handles: Vec<JoinHandle<()>>) {
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.extend(handles),
            Err(poisoned) => poisoned.into_inner().extend(handles),
        }
    }
}

fn check(config: &SyncConfig) -> SyncResult<()> {
    validate_config(config)
        .map_err(|errors| SyncError::Config(ConfigError::Validation(errors).to_string()))
}

fn apply_to(
    current: &ArcSwap<SyncConfig>,
    limiter: &RateLimiter,
    config: SyncConfig,
) -> SyncResult<()> {
    check(&config)?;
    limiter.update_config(config.rate_limit.clone());
    current.store(Arc::new(config));
    tracing::info!("Configuration applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitRule;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures_left: AtomicU32,
        marker: &'static str,
    }

    #[async_trait]
    impl OperationExecutor for Flaky {
        async fn execute(&self, _operation: &QueuedOperation) -> SyncResult<()> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(SyncError::remote(self.marker, "backend said no"));
            }
            Ok(())
        }
    }

    fn config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.retries.base_delay_ms = 1;
        config.retries.max_delay_ms = 2;
        config.retries.long_max_delay_ms = 2;
        config
    }

    fn layer(executor: Flaky, connectivity: Connectivity) -> SyncLayer {
        SyncLayer::builder(config(), Arc::new(executor))
            .store(Arc::new(MemoryStore::new()))
            .connectivity(connectivity)
            .build()
            .unwrap()
    }

    fn flaky(failures: u32, marker: &'static str) -> Flaky {
        Flaky {
            failures_left: AtomicU32::new(failures),
            marker,
        }
    }

    #[tokio::test]
    async fn test_online_write_commits() {
        let layer = layer(flaky(1, "unavailable"), Connectivity::online());
        let outcome = layer
            .write(OperationKind::Create, "classes", None, serde_json::json!({"name": "Math"}))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Committed);
        assert!(layer.queue().is_empty().await);
    }

    #[tokio::test]
    async fn test_offline_write_is_pending() {
        let layer = layer(flaky(0, "unavailable"), Connectivity::offline());
        let outcome = layer
            .write(OperationKind::Update, "classes", Some("c1".into()), serde_json::json!({}))
            .await
            .unwrap();

        let WriteOutcome::Pending(id) = outcome else {
            panic!("expected pending write");
        };
        assert!(layer.queue().get(id).await.is_some());
    }

    #[tokio::test]
    async fn test_transient_failure_falls_back_to_queue() {
        let layer = layer(flaky(100, "unavailable"), Connectivity::online());
        let outcome = layer
            .write(OperationKind::Delete, "classes", Some("c1".into()), serde_json::Value::Null)
            .await
            .unwrap();
        assert!(outcome.is_pending());
    }

    #[derive(Default)]
    struct Recorder {
        payloads: std::sync::Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl OperationExecutor for Recorder {
        async fn execute(&self, operation: &QueuedOperation) -> SyncResult<()> {
            self.payloads.lock().unwrap().push(operation.payload.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_online_write_queues_behind_pending_writes() {
        let recorder = Arc::new(Recorder::default());
        let connectivity = Connectivity::offline();
        let layer = SyncLayer::builder(config(), recorder.clone())
            .store(Arc::new(MemoryStore::new()))
            .connectivity(connectivity.clone())
            .build()
            .unwrap();

        let first = layer
            .write(OperationKind::Update, "classes", Some("c1".into()), serde_json::json!({"v": 1}))
            .await
            .unwrap();
        assert!(first.is_pending());

        connectivity.set_online(true);
        let second = layer
            .write(OperationKind::Update, "classes", Some("c1".into()), serde_json::json!({"v": 2}))
            .await
            .unwrap();
        assert!(second.is_pending());

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !layer.queue().is_empty().await || layer.queue().is_draining() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue drained");

        let payloads = recorder.payloads.lock().unwrap().clone();
        assert_eq!(payloads, vec![serde_json::json!({"v": 1}), serde_json::json!({"v": 2})]);
    }

    #[tokio::test]
    async fn test_terminal_failure_is_returned() {
        let layer = layer(flaky(1, "permission-denied"), Connectivity::online());
        let result = layer
            .write(OperationKind::Create, "classes", None, serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(SyncError::Remote { .. })));
        assert!(layer.queue().is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut bad = config();
        bad.cache.key_prefix.clear();
        let result = SyncLayer::builder(bad, Arc::new(flaky(0, "unavailable")))
            .store(Arc::new(MemoryStore::new()))
            .build();
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn test_apply_config_swaps_rate_limits() {
        let layer = layer(flaky(0, "unavailable"), Connectivity::online());
        assert_eq!(layer.limiter().rule_for(classes::AUTH).limit, 5);

        let mut updated = config();
        updated.rate_limit.rules.insert(classes::AUTH.to_string(), RateLimitRule::new(50, 60_000));
        layer.apply_config(updated).unwrap();

        assert_eq!(layer.limiter().rule_for(classes::AUTH).limit, 50);
        assert_eq!(layer.config().rate_limit.rule_for(classes::AUTH).limit, 50);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let layer = layer(flaky(0, "unavailable"), Connectivity::online());
        let report = layer.start().await.unwrap();
        assert_eq!(report.remaining, 0);
        layer.shutdown().await;
    }
}
