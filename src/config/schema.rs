//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the sync layer.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the sync layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    /// Cache store settings.
    pub cache: CacheConfig,

    /// Retry and backoff settings.
    pub retries: RetryConfig,

    /// Rate limiting per operation class.
    pub rate_limit: RateLimitConfig,

    /// Offline queue settings.
    pub queue: QueueConfig,

    /// Connectivity probing.
    pub connectivity: ConnectivityConfig,

    /// Persisted store location.
    pub storage: StorageConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Cache store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when a fetch does not specify one, in seconds.
    pub default_ttl_secs: u64,

    /// Interval between expired-entry sweeps in seconds (0 disables).
    pub sweep_interval_secs: u64,

    /// Prefix for cache keys in the persisted store.
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            sweep_interval_secs: 600,
            key_prefix: "cache:".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Delay cap for cache and query paths in milliseconds.
    pub max_delay_ms: u64,

    /// Delay cap for long-running paths (queue replay) in milliseconds.
    pub long_max_delay_ms: u64,

    /// Per-attempt timeout in milliseconds (0 disables).
    pub attempt_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            long_max_delay_ms: 30_000,
            attempt_timeout_ms: 15_000,
        }
    }
}

impl RetryConfig {
    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.attempt_timeout_ms > 0).then(|| Duration::from_millis(self.attempt_timeout_ms))
    }
}

/// A token-bucket rule for one operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitRule {
    /// Tokens granted per window (also the bucket capacity).
    pub limit: u32,

    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl RateLimitRule {
    pub fn new(limit: u32, window_ms: u64) -> Self {
        Self { limit, window_ms }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Rule used for classes without an explicit entry.
    pub default_rule: RateLimitRule,

    /// Per-class rules, keyed by operation class name.
    pub rules: HashMap<String, RateLimitRule>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut rules = HashMap::new();
        rules.insert("read".to_string(), RateLimitRule::new(100, 60_000));
        rules.insert("write".to_string(), RateLimitRule::new(30, 60_000));
        rules.insert("auth".to_string(), RateLimitRule::new(5, 60_000));
        Self {
            enabled: true,
            default_rule: RateLimitRule::new(60, 60_000),
            rules,
        }
    }
}

impl RateLimitConfig {
    /// Rule for a class, falling back to the default rule.
    pub fn rule_for(&self, class: &str) -> RateLimitRule {
        self.rules.get(class).copied().unwrap_or(self.default_rule)
    }
}

/// Offline queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Replay attempts before an operation is dropped and reported.
    pub max_attempts: u32,

    /// Key under which the queue is persisted.
    pub storage_key: String,

    /// Drain immediately after loading if online.
    pub drain_on_startup: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            storage_key: "offline_queue".to_string(),
            drain_on_startup: true,
        }
    }
}

/// Connectivity probing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Enable active probing.
    pub probe_enabled: bool,

    /// Probe interval in seconds.
    pub probe_interval_secs: u64,

    /// Probe timeout in seconds.
    pub probe_timeout_secs: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_enabled: false,
            probe_interval_secs: 15,
            probe_timeout_secs: 5,
        }
    }
}

/// Persisted store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the file-backed store.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./sync-data".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Record metrics through the `metrics` facade.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
        }
    }
}
