//! Token-bucket rate limiting per operation class.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::{RateLimitConfig, RateLimitRule};
use crate::error::{SyncError, SyncResult};
use crate::observability::metrics;
use crate::observability::telemetry::{events, TelemetrySink};

/// Well-known operation classes. Any string works as a key; these keep
/// callers consistent.
pub mod classes {
    pub const READ: &str = "read";
    pub const WRITE: &str = "write";
    pub const AUTH: &str = "auth";
}

/// Hook invoked with the class key when a request is denied.
pub type OnLimitExceeded = Arc<dyn Fn(&str) + Send + Sync>;

/// A token bucket refilled in whole windows.
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(limit: u32, now: Instant) -> Self {
        Self {
            tokens: limit,
            last_refill: now,
        }
    }

    /// Add `limit` tokens per elapsed whole window, keeping the fractional
    /// remainder by advancing `last_refill` only over consumed windows.
    fn refill(&mut self, rule: RateLimitRule, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let windows = elapsed.as_millis() as u64 / rule.window_ms.max(1);
        if windows > 0 {
            let granted = windows.saturating_mul(rule.limit as u64);
            self.tokens = (self.tokens as u64)
                .saturating_add(granted)
                .min(rule.limit as u64) as u32;
            self.last_refill += Duration::from_millis(rule.window_ms.saturating_mul(windows));
        }
        // A rule change may have lowered the ceiling.
        self.tokens = self.tokens.min(rule.limit);
    }

    fn try_acquire(&mut self, rule: RateLimitRule, now: Instant) -> bool {
        self.refill(rule, now);
        if self.tokens >= 1 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }
}

/// Admission control keyed by operation class.
///
/// Each class has its own bucket, so exhausting writes never starves reads.
/// Buckets live only in memory.
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    config: ArcSwap<RateLimitConfig>,
    on_limit_exceeded: Option<OnLimitExceeded>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config: ArcSwap::from_pointee(config),
            on_limit_exceeded: None,
            telemetry: None,
        }
    }

    /// Limiter where every class shares the same rule.
    pub fn uniform(limit: u32, window: Duration) -> Self {
        Self::new(RateLimitConfig {
            enabled: true,
            default_rule: RateLimitRule::new(limit, window.as_millis() as u64),
            rules: Default::default(),
        })
    }

    pub fn with_on_limit_exceeded<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_limit_exceeded = Some(Arc::new(f));
        self
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Replace the rule set. Existing buckets keep their balance, capped to
    /// the new limit on next check.
    pub fn update_config(&self, config: RateLimitConfig) {
        tracing::info!(
            enabled = config.enabled,
            classes = config.rules.len(),
            "Rate limit rules updated"
        );
        self.config.store(Arc::new(config));
    }

    pub fn rule_for(&self, key: &str) -> RateLimitRule {
        self.config.load().rule_for(key)
    }

    /// Check and consume one token for `key`.
    pub fn is_allowed(&self, key: &str) -> bool {
        let config = self.config.load();
        if !config.enabled {
            return true;
        }
        let rule = config.rule_for(key);
        let now = Instant::now();

        let allowed = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(rule.limit, now))
            .try_acquire(rule, now);

        if !allowed {
            self.report_rejection(key);
        }
        allowed
    }

    /// Run `op` if a token is available, otherwise fail with
    /// [`SyncError::RateLimited`] without invoking it.
    pub async fn execute<T, F, Fut>(&self, key: &str, op: F) -> SyncResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        if !self.is_allowed(key) {
            return Err(SyncError::RateLimited {
                class: key.to_string(),
            });
        }
        op().await
    }

    /// Tokens left for `key` after refilling, without consuming.
    pub fn remaining(&self, key: &str) -> u32 {
        let rule = self.rule_for(key);
        let now = Instant::now();
        match self.buckets.get_mut(key) {
            Some(mut bucket) => {
                bucket.refill(rule, now);
                bucket.tokens
            }
            None => rule.limit,
        }
    }

    /// Forget the bucket for `key`; the next check starts full.
    pub fn reset(&self, key: &str) {
        self.buckets.remove(key);
    }

    pub fn reset_all(&self) {
        self.buckets.clear();
    }

    fn report_rejection(&self, key: &str) {
        tracing::warn!(class = %key, "Rate limit exceeded");
        metrics::record_rate_limited(key);

        if let Some(sink) = &self.telemetry {
            sink.record_event(events::RATE_LIMITED, &[("class", key.to_string())]);
        }
        if let Some(hook) = &self.on_limit_exceeded {
            hook(key);
        }
    }
}
