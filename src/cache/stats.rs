//! Cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fresh cached values served.
    pub hits: u64,
    /// Stale cached values served.
    pub stale_hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Successful network fetches.
    pub network_fetches: u64,
    /// Values produced by a fallback operation.
    pub fallbacks: u64,
    /// Background refreshes that failed.
    pub refresh_failures: u64,
    /// Entries removed by expiry sweeps.
    pub expired_evictions: u64,
}

impl CacheStats {
    /// Share of lookups answered from cache, fresh or stale (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.stale_hits;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub hits: AtomicU64,
    pub stale_hits: AtomicU64,
    pub misses: AtomicU64,
    pub network_fetches: AtomicU64,
    pub fallbacks: AtomicU64,
    pub refresh_failures: AtomicU64,
    pub expired_evictions: AtomicU64,
}

impl StatsCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            expired_evictions: self.expired_evictions.load(Ordering::Relaxed),
        }
    }
}
