//! Exponential backoff with jitter, and retryability classification.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::SyncError;

/// Calculate exponential backoff delay with jitter.
///
/// `delay = min(base * 2^attempt + uniform(0, base), max)`, with `attempt`
/// zero-based.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let jitter_ms = if base_ms > 0 {
        rand::thread_rng().gen_range(0..base_ms)
    } else {
        0
    };
    backoff_with_jitter(attempt, base_ms, max_ms, jitter_ms)
}

/// Deterministic core of [`calculate_backoff`].
pub fn backoff_with_jitter(attempt: u32, base_ms: u64, max_ms: u64, jitter_ms: u64) -> Duration {
    let exponential = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    let delay_ms = exponential.saturating_add(jitter_ms).min(max_ms);
    Duration::from_millis(delay_ms)
}

/// Retry policy: how long to wait and which errors deserve another try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::query()
    }
}

impl BackoffPolicy {
    /// Policy for cache and query paths: 1s base, 10s cap, 3 retries.
    pub fn query() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: 3,
        }
    }

    /// Policy for long-running paths such as queue replay: 30s cap.
    pub fn long_running() -> Self {
        Self {
            max_delay: Duration::from_secs(30),
            ..Self::query()
        }
    }

    /// Query-path policy from config.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_retries: config.max_attempts,
        }
    }

    /// Long-running policy from config.
    pub fn long_running_from_config(config: &RetryConfig) -> Self {
        Self {
            max_delay: Duration::from_millis(config.long_max_delay_ms),
            ..Self::from_config(config)
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Whether `error` carries a transient-fault marker.
    pub fn classify(&self, error: &SyncError) -> bool {
        is_retryable(error)
    }

    /// Delay before retrying after the zero-based `attempt` failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.base_delay.as_millis() as u64,
            self.max_delay.as_millis() as u64,
        )
    }
}

const TRANSIENT_MESSAGE_MARKERS: [&str; 5] =
    ["unavailable", "network", "timeout", "deadline", "exhausted"];

/// Classify an error as retryable.
///
/// Decided by marker, not by variant: remote faults with a transient code,
/// per-attempt timeouts, and unclassified remote faults whose message names a
/// transient condition. Rate limiting, cancellation, and local failures are
/// terminal.
pub fn is_retryable(error: &SyncError) -> bool {
    if let Some(code) = error.fault_code() {
        if code.is_transient() {
            return true;
        }
    }
    match error {
        SyncError::Remote { code, message } if *code == crate::error::FaultCode::Unknown => {
            let lower = message.to_ascii_lowercase();
            TRANSIENT_MESSAGE_MARKERS.iter().any(|m| lower.contains(m))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(backoff_with_jitter(0, 1000, 10_000, 0), Duration::from_millis(1000));
        assert_eq!(backoff_with_jitter(1, 1000, 10_000, 0), Duration::from_millis(2000));
        assert_eq!(backoff_with_jitter(2, 1000, 10_000, 500), Duration::from_millis(4500));
        assert_eq!(backoff_with_jitter(4, 1000, 10_000, 999), Duration::from_millis(10_000));
    }

    #[test]
    fn test_backoff_saturates() {
        assert_eq!(backoff_with_jitter(80, 1000, 30_000, 0), Duration::from_millis(30_000));
    }

    #[test]
    fn test_policies() {
        assert_eq!(BackoffPolicy::query().max_delay, Duration::from_secs(10));
        assert_eq!(BackoffPolicy::long_running().max_delay, Duration::from_secs(30));
        assert_eq!(BackoffPolicy::default().max_retries, 3);

        let config = RetryConfig::default();
        assert_eq!(BackoffPolicy::from_config(&config), BackoffPolicy::query());
        assert_eq!(
            BackoffPolicy::long_running_from_config(&config),
            BackoffPolicy::long_running()
        );
    }

    #[test]
    fn test_classification() {
        let policy = BackoffPolicy::query();
        assert!(policy.classify(&SyncError::remote("unavailable", "503")));
        assert!(policy.classify(&SyncError::remote("firestore/internal", "boom")));
        assert!(policy.classify(&SyncError::Timeout(Duration::from_secs(1))));
        assert!(policy.classify(&SyncError::remote("weird", "Network request failed")));

        assert!(!policy.classify(&SyncError::remote("permission-denied", "nope")));
        assert!(!policy.classify(&SyncError::remote("weird", "bad payload")));
        assert!(!policy.classify(&SyncError::RateLimited { class: "read".into() }));
        assert!(!policy.classify(&SyncError::Cancelled));
        assert!(!policy.classify(&SyncError::CacheMiss { key: "k".into() }));
    }

    proptest! {
        #[test]
        fn prop_delay_is_bounded(attempt in 0u32..64, base in 1u64..5_000, cap in 1u64..60_000) {
            let delay = calculate_backoff(attempt, base, cap);
            prop_assert!(delay <= Duration::from_millis(cap));
            let floor = base.saturating_mul(2u64.saturating_pow(attempt)).min(cap);
            prop_assert!(delay >= Duration::from_millis(floor));
        }
    }
}
