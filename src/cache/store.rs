//! Two-tier cache store.
//!
//! An in-process map fronts a [`PersistedStore`]. The persisted copy is the
//! source of truth; the map is a cache of it, repopulated on persisted hits.
//!
//! # Consistency
//! - Writes and deletes for a key run under that key's async lock, covering
//!   both tiers, so a background refresh and a foreground `set` on the same
//!   key are serialized (last writer wins).
//! - Entries are replaced whole in the map, so readers see the full prior
//!   entry or nothing.
//! - Different keys never contend.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

use super::entry::{now_ms, CacheEntry};
use super::stats::{CacheStats, StatsCounters};
use crate::error::SyncResult;
use crate::observability::metrics;
use crate::storage::PersistedStore;

/// Read-through, write-through two-tier cache.
pub struct CacheStore {
    memory: DashMap<String, CacheEntry>,
    persisted: Arc<dyn PersistedStore>,
    prefix: String,
    key_locks: DashMap<String, Arc<Mutex<()>>>,
    stats: StatsCounters,
}

impl CacheStore {
    /// Create a store whose persisted keys are `prefix + key`.
    pub fn new(persisted: Arc<dyn PersistedStore>, prefix: impl Into<String>) -> Self {
        Self {
            memory: DashMap::new(),
            persisted,
            prefix: prefix.into(),
            key_locks: DashMap::new(),
            stats: StatsCounters::default(),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.key_locks.entry(key.to_string()).or_default().clone()
    }

    /// Forget the lock for a key that no longer holds data. Callers must have
    /// dropped their own handle; a lock anyone else still holds is kept.
    fn release_lock(&self, key: &str) {
        self.key_locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Look up `key`, returning the entry whether fresh or stale.
    ///
    /// Memory first; on miss or staleness the persisted tier is consulted and
    /// a persisted hit repopulates memory. Storage read failures degrade to
    /// whatever memory holds.
    pub async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let cached = self.memory.get(key).map(|r| r.value().clone());
        if let Some(entry) = &cached {
            if entry.is_fresh() {
                StatsCounters::incr(&self.stats.hits);
                return cached;
            }
        }

        let lock = self.key_lock(key);
        let guard = lock.lock().await;

        let entry = match self.read_persisted(key).await {
            Ok(Some(persisted)) => {
                // Keep whichever copy is newer; a failed persisted write can
                // leave memory ahead of disk.
                let newest = match self.memory.get(key).map(|r| r.value().clone()) {
                    Some(mem) if mem.stored_at > persisted.stored_at => mem,
                    _ => persisted,
                };
                self.memory.insert(key.to_string(), newest.clone());
                Some(newest)
            }
            Ok(None) => self.memory.get(key).map(|r| r.value().clone()),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Persisted cache read failed");
                self.memory.get(key).map(|r| r.value().clone())
            }
        };

        drop(guard);
        drop(lock);

        match &entry {
            Some(e) if e.is_fresh() => StatsCounters::incr(&self.stats.hits),
            Some(_) => StatsCounters::incr(&self.stats.stale_hits),
            None => {
                StatsCounters::incr(&self.stats.misses);
                self.release_lock(key);
            }
        }
        entry
    }

    /// Fresh entry for `key`, if any.
    pub async fn lookup_fresh(&self, key: &str) -> Option<CacheEntry> {
        self.lookup(key).await.filter(CacheEntry::is_fresh)
    }

    /// Value for `key` (fresh or stale), decoded.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.lookup(key).await?;
        match entry.decode() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cached value has unexpected shape");
                None
            }
        }
    }

    /// Store `value` under `key` in both tiers.
    ///
    /// Memory is updated first so subsequent reads in this process see the
    /// value even if the persisted write fails; the persisted error is still
    /// returned to the caller.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> SyncResult<()> {
        let value = serde_json::to_value(value)?;
        self.put_entry(CacheEntry::new(key, value, ttl)).await
    }

    /// Store a pre-built entry, preserving its timestamp.
    pub async fn put_entry(&self, entry: CacheEntry) -> SyncResult<()> {
        let key = entry.key.clone();
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let bytes = entry.to_bytes()?;
        self.memory.insert(key.clone(), entry);
        metrics::record_cache_size(self.memory.len());
        self.persisted.put(&self.storage_key(&key), bytes).await
    }

    /// Remove `key` from both tiers.
    pub async fn delete(&self, key: &str) -> SyncResult<()> {
        let result = {
            let lock = self.key_lock(key);
            let _guard = lock.lock().await;

            self.memory.remove(key);
            self.persisted.delete(&self.storage_key(key)).await
        };
        self.release_lock(key);
        result
    }

    /// Remove every entry whose key starts with `prefix`. Returns the count.
    pub async fn delete_prefix(&self, prefix: &str) -> SyncResult<usize> {
        let keys: Vec<String> = self
            .all_keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        for key in &keys {
            self.delete(key).await?;
        }
        tracing::debug!(prefix = %prefix, removed = keys.len(), "Cache prefix invalidated");
        Ok(keys.len())
    }

    /// Remove every entry from both tiers.
    pub async fn clear(&self) -> SyncResult<()> {
        let keys = self.all_keys().await?;
        for key in &keys {
            self.delete(key).await?;
        }
        metrics::record_cache_size(self.memory.len());
        tracing::info!(removed = keys.len(), "Cache cleared");
        Ok(())
    }

    /// Sweep expired entries from both tiers. Returns the number of keys
    /// removed.
    pub async fn clear_expired(&self) -> SyncResult<usize> {
        let now = now_ms();
        let mut removed = 0;

        for key in self.all_keys().await? {
            let lock = self.key_lock(&key);
            let guard = lock.lock().await;

            let mut expired = false;
            let memory_expired = self
                .memory
                .get(&key)
                .map(|r| !r.value().is_fresh_at(now))
                .unwrap_or(false);
            if memory_expired {
                self.memory.remove(&key);
                expired = true;
            }

            match self.read_persisted(&key).await {
                Ok(Some(entry)) if !entry.is_fresh_at(now) => {
                    self.persisted.delete(&self.storage_key(&key)).await?;
                    expired = true;
                }
                Ok(_) => {}
                Err(e) => {
                    // Undecodable entries are dropped along with expired ones.
                    tracing::warn!(key = %key, error = %e, "Removing unreadable cache entry");
                    self.persisted.delete(&self.storage_key(&key)).await?;
                    expired = true;
                }
            }

            drop(guard);
            drop(lock);
            if expired {
                removed += 1;
                if !self.memory.contains_key(&key) {
                    self.release_lock(&key);
                }
            }
        }

        StatsCounters::add(&self.stats.expired_evictions, removed as u64);
        metrics::record_cache_size(self.memory.len());
        if removed > 0 {
            tracing::debug!(removed, "Expired cache entries swept");
        }
        Ok(removed)
    }

    /// Every entry in the persisted tier, decoded. Unreadable entries are
    /// skipped.
    pub async fn entries(&self) -> SyncResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for key in self.persisted_keys().await? {
            if let Ok(Some(entry)) = self.read_persisted(&key).await {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Number of entries held in memory.
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// Drop the in-memory tier only, as after a process restart.
    pub fn evict_memory(&self) {
        self.memory.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    pub(crate) fn counters(&self) -> &StatsCounters {
        &self.stats
    }

    async fn read_persisted(&self, key: &str) -> SyncResult<Option<CacheEntry>> {
        match self.persisted.get(&self.storage_key(key)).await? {
            Some(bytes) => Ok(Some(CacheEntry::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Cache keys (without prefix) present in the persisted tier.
    async fn persisted_keys(&self) -> SyncResult<Vec<String>> {
        Ok(self
            .persisted
            .keys()
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }

    /// Union of keys in both tiers.
    async fn all_keys(&self) -> SyncResult<Vec<String>> {
        let mut keys: BTreeSet<String> = self.persisted_keys().await?.into_iter().collect();
        keys.extend(self.memory.iter().map(|r| r.key().clone()));
        Ok(keys.into_iter().collect())
    }
}
