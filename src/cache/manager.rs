//! Strategy-driven fetches over the cache store.
//!
//! [`CacheManager::fetch`] combines [`CacheStore`] reads and writes with a
//! caller-supplied network operation according to a [`FetchStrategy`]. Every
//! network call passes the rate limiter and runs under the retry executor.
//!
//! Stale-while-revalidate refreshes run as detached tasks. At most one
//! refresh per key is in flight; later requests for the same key join it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;

use super::stats::StatsCounters;
use super::store::CacheStore;
use super::strategy::FetchStrategy;
use crate::error::{SyncError, SyncResult};
use crate::lifecycle::CancelToken;
use crate::limits::{classes, RateLimiter};
use crate::observability::metrics;
use crate::observability::telemetry::{events, NoopSink, TelemetrySink};
use crate::resilience::{BackoffPolicy, RetryExecutor};

/// A network operation, callable once per attempt.
pub type NetworkOp<T> = Arc<dyn Fn() -> BoxFuture<'static, SyncResult<T>> + Send + Sync>;

/// Last-resort producer used when both network and cache come up empty.
pub type FallbackOp<T> = Box<dyn FnOnce() -> BoxFuture<'static, SyncResult<T>> + Send>;

/// Parameters for a single [`CacheManager::fetch`].
pub struct FetchRequest<T> {
    key: String,
    strategy: FetchStrategy,
    network: NetworkOp<T>,
    fallback: Option<FallbackOp<T>>,
    ttl: Option<Duration>,
    class: String,
    cancel: Option<CancelToken>,
}

impl<T: Send + 'static> FetchRequest<T> {
    pub fn new<F, Fut>(key: impl Into<String>, network: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        Self {
            key: key.into(),
            strategy: FetchStrategy::default(),
            network: Arc::new(move || network().boxed()),
            fallback: None,
            ttl: None,
            class: classes::READ.to_string(),
            cancel: None,
        }
    }

    pub fn strategy(mut self, strategy: FetchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        self.fallback = Some(Box::new(move || fallback().boxed()));
        self
    }

    /// TTL for values stored by this fetch. Defaults to the manager's TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Rate-limit class for the network call. Defaults to `read`.
    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }

    /// Token that aborts the foreground network call and its retries.
    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Fresh,
    Stale,
    Network,
    Fallback,
}

impl Source {
    fn as_str(self) -> &'static str {
        match self {
            Source::Fresh => "hit",
            Source::Stale => "stale",
            Source::Network => "network",
            Source::Fallback => "fallback",
        }
    }
}

/// Cache orchestrator.
///
/// Cheap to clone; clones share the store, limiter, and in-flight refresh
/// table.
#[derive(Clone)]
pub struct CacheManager {
    store: Arc<CacheStore>,
    limiter: Arc<RateLimiter>,
    policy: BackoffPolicy,
    attempt_timeout: Option<Duration>,
    telemetry: Arc<dyn TelemetrySink>,
    default_ttl: Duration,
    background_cancel: Option<CancelToken>,
    inflight: Arc<DashMap<String, watch::Receiver<bool>>>,
}

impl CacheManager {
    pub fn new(store: Arc<CacheStore>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            store,
            limiter,
            policy: BackoffPolicy::query(),
            attempt_timeout: None,
            telemetry: Arc::new(NoopSink),
            default_ttl: Duration::from_secs(300),
            background_cancel: None,
            inflight: Arc::new(DashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Deadline for each individual network attempt.
    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Token that stops background refreshes, normally tied to shutdown.
    pub fn with_background_cancel(mut self, token: CancelToken) -> Self {
        self.background_cancel = Some(token);
        self
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Fetch a value according to the request's strategy.
    ///
    /// Caller cancellation is terminal: it skips cached and fallback
    /// degradation and surfaces as [`SyncError::Cancelled`].
    pub async fn fetch<T>(&self, request: FetchRequest<T>) -> SyncResult<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let strategy = request.strategy;
        let key = request.key.clone();
        let result = self.fetch_inner(request).await;

        let outcome = match &result {
            Ok((_, source)) => source.as_str(),
            Err(SyncError::CacheMiss { .. }) => "miss",
            Err(e) if e.is_cancelled() => "cancelled",
            Err(_) => "error",
        };
        metrics::record_cache_outcome(strategy.as_str(), outcome);
        self.telemetry.record_event(
            events::CACHE_FETCH,
            &[
                ("strategy", strategy.as_str().to_string()),
                ("key", key.clone()),
                ("outcome", outcome.to_string()),
            ],
        );
        tracing::debug!(key = %key, strategy = %strategy, outcome, "Cache fetch finished");

        result.map(|(value, _)| value)
    }

    async fn fetch_inner<T>(&self, request: FetchRequest<T>) -> SyncResult<(T, Source)>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let FetchRequest {
            key,
            strategy,
            network,
            fallback,
            ttl,
            class,
            cancel,
        } = request;
        let ttl = ttl.unwrap_or(self.default_ttl);

        match strategy {
            FetchStrategy::CacheOnly => match self.cached::<T>(&key, false).await {
                Some(hit) => Ok(hit),
                None => {
                    let miss = SyncError::CacheMiss { key: key.clone() };
                    self.run_fallback(fallback, miss).await
                }
            },
            FetchStrategy::NetworkOnly => {
                match self.fetch_network(&key, &network, ttl, &class, cancel).await {
                    Ok(value) => Ok((value, Source::Network)),
                    Err(e) => self.run_fallback(fallback, e).await,
                }
            }
            FetchStrategy::NetworkFirst => {
                match self.fetch_network(&key, &network, ttl, &class, cancel).await {
                    Ok(value) => Ok((value, Source::Network)),
                    Err(e) if e.is_cancelled() => Err(e),
                    Err(e) => match self.cached::<T>(&key, false).await {
                        Some(hit) => {
                            tracing::warn!(
                                key = %key,
                                error = %e,
                                "Network failed, serving cached value"
                            );
                            Ok(hit)
                        }
                        None => self.run_fallback(fallback, e).await,
                    },
                }
            }
            FetchStrategy::CacheFirst => {
                if let Some(hit) = self.cached::<T>(&key, true).await {
                    return Ok(hit);
                }
                match self.fetch_network(&key, &network, ttl, &class, cancel).await {
                    Ok(value) => Ok((value, Source::Network)),
                    Err(e) if e.is_cancelled() => Err(e),
                    Err(e) => match self.cached::<T>(&key, false).await {
                        Some(hit) => {
                            tracing::warn!(
                                key = %key,
                                error = %e,
                                "Network failed, serving stale value"
                            );
                            Ok(hit)
                        }
                        None => self.run_fallback(fallback, e).await,
                    },
                }
            }
            FetchStrategy::StaleWhileRevalidate => {
                if let Some(hit) = self.cached::<T>(&key, false).await {
                    self.spawn_refresh(key, network, ttl, class);
                    return Ok(hit);
                }
                match self.fetch_network(&key, &network, ttl, &class, cancel).await {
                    Ok(value) => Ok((value, Source::Network)),
                    Err(e) => self.run_fallback(fallback, e).await,
                }
            }
        }
    }

    /// Cached value for `key`. With `require_fresh`, stale entries count as
    /// absent. Values of the wrong shape count as absent too.
    async fn cached<T: DeserializeOwned>(
        &self,
        key: &str,
        require_fresh: bool,
    ) -> Option<(T, Source)> {
        let entry = self.store.lookup(key).await?;
        let fresh = entry.is_fresh();
        if require_fresh && !fresh {
            return None;
        }
        match entry.decode() {
            Ok(value) => Some((value, if fresh { Source::Fresh } else { Source::Stale })),
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "Ignoring cached value with unexpected shape"
                );
                None
            }
        }
    }

    async fn run_fallback<T>(
        &self,
        fallback: Option<FallbackOp<T>>,
        error: SyncError,
    ) -> SyncResult<(T, Source)> {
        if error.is_cancelled() {
            return Err(error);
        }
        match fallback {
            Some(op) => {
                tracing::debug!(error = %error, "Using fallback");
                let value = op().await?;
                StatsCounters::incr(&self.store.counters().fallbacks);
                Ok((value, Source::Fallback))
            }
            None => Err(error),
        }
    }

    /// Rate-limited, retried network call. A successful value is written to
    /// the cache; a failed cache write is logged and does not fail the fetch.
    async fn fetch_network<T>(
        &self,
        key: &str,
        network: &NetworkOp<T>,
        ttl: Duration,
        class: &str,
        cancel: Option<CancelToken>,
    ) -> SyncResult<T>
    where
        T: Serialize + Send + Sync + 'static,
    {
        let mut executor = RetryExecutor::new(self.policy)
            .with_label(format!("fetch:{class}"))
            .with_attempt_timeout(self.attempt_timeout)
            .with_telemetry(self.telemetry.clone());
        if let Some(token) = cancel {
            executor = executor.with_cancel(token);
        }

        let limiter = &self.limiter;
        let value = executor
            .execute(|| {
                let network = network.clone();
                async move { limiter.execute(class, move || network()).await }
            })
            .await?;

        StatsCounters::incr(&self.store.counters().network_fetches);
        if let Err(e) = self.store.set(key, &value, ttl).await {
            tracing::warn!(key = %key, error = %e, "Failed to cache network result");
        }
        Ok(value)
    }

    /// Start a background refresh of `key` unless one is already running.
    fn spawn_refresh<T>(&self, key: String, network: NetworkOp<T>, ttl: Duration, class: String)
    where
        T: Serialize + Send + Sync + 'static,
    {
        let (done_tx, done_rx) = watch::channel(false);
        match self.inflight.entry(key.clone()) {
            Entry::Occupied(_) => {
                tracing::trace!(key = %key, "Joining in-flight refresh");
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(done_rx);
            }
        }

        let manager = self.clone();
        tokio::spawn(async move {
            let cancel = manager.background_cancel.clone();
            let result = manager.fetch_network(&key, &network, ttl, &class, cancel).await;

            match result {
                Ok(_) => tracing::debug!(key = %key, "Background refresh stored"),
                Err(e) if e.is_cancelled() => {
                    tracing::debug!(key = %key, "Background refresh cancelled")
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Background refresh failed");
                    StatsCounters::incr(&manager.store.counters().refresh_failures);
                    manager
                        .telemetry
                        .record_error(events::CACHE_REFRESH_FAILED, &e, &[("key", key.clone())]);
                }
            }

            manager.inflight.remove(&key);
            let _ = done_tx.send(true);
        });
    }

    /// Whether a background refresh for `key` is running.
    pub fn refresh_in_flight(&self, key: &str) -> bool {
        self.inflight.contains_key(key)
    }

    /// Wait for the in-flight refresh of `key`, if any, to finish.
    pub async fn wait_for_refresh(&self, key: &str) {
        let pending = self.inflight.get(key).map(|r| r.value().clone());
        if let Some(mut done) = pending {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    /// Store a value directly, e.g. after a confirmed write.
    pub async fn prime<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> SyncResult<()> {
        self.store.set(key, value, ttl.unwrap_or(self.default_ttl)).await
    }

    /// Drop the cached value for `key`.
    pub async fn invalidate(&self, key: &str) -> SyncResult<()> {
        self.store.delete(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use crate::observability::MemorySink;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn manager() -> CacheManager {
        let store = Arc::new(CacheStore::new(Arc::new(MemoryStore::new()), "cache:"));
        let limiter = Arc::new(RateLimiter::uniform(1_000, Duration::from_secs(60)));
        CacheManager::new(store, limiter).with_policy(
            BackoffPolicy::query()
                .with_base_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5)),
        )
    }

    fn counting(
        calls: &Arc<AtomicU32>,
        value: &'static str,
    ) -> impl Fn() -> BoxFuture<'static, SyncResult<String>> + Send + Sync + 'static {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(value.to_string()) }.boxed()
        }
    }

    fn failing(
        calls: &Arc<AtomicU32>,
    ) -> impl Fn() -> BoxFuture<'static, SyncResult<String>> + Send + Sync + 'static {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SyncError::remote("unavailable", "down")) }.boxed()
        }
    }

    async fn put_stale(manager: &CacheManager, key: &str, value: &str) {
        let entry = CacheEntry {
            key: key.to_string(),
            value: json!(value),
            stored_at: crate::cache::entry::now_ms() - 60_000,
            ttl: 1_000,
        };
        manager.store().put_entry(entry).await.unwrap();
    }

    #[tokio::test]
    async fn test_cache_only_round_trip_and_miss() {
        let manager = manager();
        let calls = Arc::new(AtomicU32::new(0));
        manager.prime("k", &"cached", None).await.unwrap();

        let value = manager
            .fetch(
                FetchRequest::new("k", counting(&calls, "net"))
                    .strategy(FetchStrategy::CacheOnly),
            )
            .await
            .unwrap();
        assert_eq!(value, "cached");

        let miss = manager
            .fetch(
                FetchRequest::new("absent", counting(&calls, "net"))
                    .strategy(FetchStrategy::CacheOnly),
            )
            .await;
        assert!(matches!(miss, Err(SyncError::CacheMiss { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_only_uses_fallback() {
        let manager = manager();
        let calls = Arc::new(AtomicU32::new(0));
        let value = manager
            .fetch(
                FetchRequest::new("absent", counting(&calls, "net"))
                    .strategy(FetchStrategy::CacheOnly)
                    .fallback(|| async { Ok("fallback".to_string()) }),
            )
            .await
            .unwrap();
        assert_eq!(value, "fallback");
        assert_eq!(manager.store().stats().fallbacks, 1);
    }

    #[tokio::test]
    async fn test_network_only_stores_result() {
        let manager = manager();
        let calls = Arc::new(AtomicU32::new(0));
        manager.prime("k", &"old", None).await.unwrap();

        let value = manager
            .fetch(
                FetchRequest::new("k", counting(&calls, "new"))
                    .strategy(FetchStrategy::NetworkOnly),
            )
            .await
            .unwrap();
        assert_eq!(value, "new");
        assert_eq!(manager.store().get::<String>("k").await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_network_first_degrades_to_stale() {
        let manager = manager();
        let calls = Arc::new(AtomicU32::new(0));
        put_stale(&manager, "k", "stale").await;

        let value = manager
            .fetch(FetchRequest::new("k", failing(&calls)).strategy(FetchStrategy::NetworkFirst))
            .await
            .unwrap();
        assert_eq!(value, "stale");
        // Initial attempt plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_network_first_propagates_without_cache() {
        let manager = manager();
        let calls = Arc::new(AtomicU32::new(0));
        let result = manager
            .fetch(FetchRequest::new("k", failing(&calls)).strategy(FetchStrategy::NetworkFirst))
            .await;
        assert!(matches!(result, Err(SyncError::Remote { .. })));
    }

    #[tokio::test]
    async fn test_cache_first_never_serves_expired() {
        let manager = manager();
        let calls = Arc::new(AtomicU32::new(0));
        put_stale(&manager, "k", "stale").await;

        let value = manager
            .fetch(
                FetchRequest::new("k", counting(&calls, "fresh"))
                    .strategy(FetchStrategy::CacheFirst),
            )
            .await
            .unwrap();
        assert_eq!(value, "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Now fresh: served without a network call.
        let value = manager
            .fetch(
                FetchRequest::new("k", counting(&calls, "other"))
                    .strategy(FetchStrategy::CacheFirst),
            )
            .await
            .unwrap();
        assert_eq!(value, "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_first_serves_stale_when_network_fails() {
        let manager = manager();
        let calls = Arc::new(AtomicU32::new(0));
        put_stale(&manager, "k", "stale").await;

        let value: String = manager
            .fetch(FetchRequest::new("k", failing(&calls)).strategy(FetchStrategy::CacheFirst))
            .await
            .unwrap();
        assert_eq!(value, "stale");
        // The network was still consulted before degrading.
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_cache_first_without_cache_surfaces_network_error() {
        let manager = manager();
        let calls = Arc::new(AtomicU32::new(0));

        let result: SyncResult<String> = manager
            .fetch(FetchRequest::new("k", failing(&calls)).strategy(FetchStrategy::CacheFirst))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_swr_returns_stale_then_refreshes() {
        let manager = manager();
        let calls = Arc::new(AtomicU32::new(0));
        put_stale(&manager, "k", "stale").await;

        let value = manager
            .fetch(
                FetchRequest::new("k", counting(&calls, "fresh"))
                    .strategy(FetchStrategy::StaleWhileRevalidate),
            )
            .await
            .unwrap();
        assert_eq!(value, "stale");

        manager.wait_for_refresh("k").await;
        assert!(!manager.refresh_in_flight("k"));
        assert_eq!(manager.store().get::<String>("k").await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_swr_without_cache_blocks_on_network() {
        let manager = manager();
        let calls = Arc::new(AtomicU32::new(0));
        let value = manager
            .fetch(
                FetchRequest::new("k", counting(&calls, "net"))
                    .strategy(FetchStrategy::StaleWhileRevalidate),
            )
            .await
            .unwrap();
        assert_eq!(value, "net");
        assert!(!manager.refresh_in_flight("k"));
    }

    #[tokio::test]
    async fn test_swr_refresh_failure_is_recorded_not_thrown() {
        let sink = Arc::new(MemorySink::new());
        let manager = manager().with_telemetry(sink.clone());
        let calls = Arc::new(AtomicU32::new(0));
        put_stale(&manager, "k", "stale").await;

        let value = manager
            .fetch(
                FetchRequest::new("k", failing(&calls))
                    .strategy(FetchStrategy::StaleWhileRevalidate),
            )
            .await
            .unwrap();
        assert_eq!(value, "stale");

        manager.wait_for_refresh("k").await;
        assert_eq!(sink.count(events::CACHE_REFRESH_FAILED), 1);
        assert_eq!(manager.store().stats().refresh_failures, 1);
        assert_eq!(manager.store().get::<String>("k").await.unwrap(), "stale");
    }

    #[tokio::test]
    async fn test_swr_refreshes_are_deduplicated() {
        let manager = manager();
        let calls = Arc::new(AtomicU32::new(0));
        put_stale(&manager, "k", "stale").await;

        let (release_tx, release_rx) = watch::channel(false);
        let slow = {
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                let mut release = release_rx.clone();
                async move {
                    let _ = release.wait_for(|go| *go).await;
                    Ok("fresh".to_string())
                }
            }
        };

        let request = || {
            FetchRequest::new("k", slow.clone()).strategy(FetchStrategy::StaleWhileRevalidate)
        };
        assert_eq!(manager.fetch(request()).await.unwrap(), "stale");
        assert_eq!(manager.fetch(request()).await.unwrap(), "stale");
        assert!(manager.refresh_in_flight("k"));

        release_tx.send(true).unwrap();
        manager.wait_for_refresh("k").await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_rejection_is_terminal() {
        let store = Arc::new(CacheStore::new(Arc::new(MemoryStore::new()), "cache:"));
        let limiter = Arc::new(RateLimiter::uniform(1, Duration::from_secs(60)));
        let manager = CacheManager::new(store, limiter);
        let calls = Arc::new(AtomicU32::new(0));

        let request =
            || FetchRequest::new("k", counting(&calls, "v")).strategy(FetchStrategy::NetworkOnly);
        manager.fetch(request()).await.unwrap();
        let second = manager.fetch(request()).await;

        assert!(matches!(second, Err(SyncError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_skips_fallback() {
        let manager = manager();
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancelToken::new();
        token.cancel();

        let result = manager
            .fetch(
                FetchRequest::new("k", counting(&calls, "v"))
                    .strategy(FetchStrategy::NetworkOnly)
                    .cancel(token)
                    .fallback(|| async { Ok("fallback".to_string()) }),
            )
            .await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }

    #[tokio::test]
    async fn test_fetch_records_outcome_telemetry() {
        let sink = Arc::new(MemorySink::new());
        let manager = manager().with_telemetry(sink.clone());
        let calls = Arc::new(AtomicU32::new(0));

        manager
            .fetch(
                FetchRequest::new("k", counting(&calls, "v"))
                    .strategy(FetchStrategy::CacheFirst),
            )
            .await
            .unwrap();

        let events = sink.named(events::CACHE_FETCH);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attribute("strategy"), Some("cache_first"));
        assert_eq!(events[0].attribute("outcome"), Some("network"));
    }
}
