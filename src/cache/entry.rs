//! Cache entries and freshness.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::SyncResult;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A cached value with the metadata needed to judge its freshness.
///
/// Entries are replaced whole; nothing updates a field in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    /// When the value was stored (ms since epoch).
    pub stored_at: u64,
    /// Time-to-live in milliseconds.
    pub ttl: u64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: serde_json::Value, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            stored_at: now_ms(),
            ttl: ttl.as_millis() as u64,
        }
    }

    /// Fresh iff `now - stored_at <= ttl`.
    pub fn is_fresh_at(&self, now: u64) -> bool {
        now.saturating_sub(self.stored_at) <= self.ttl
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(now_ms())
    }

    pub fn is_stale(&self) -> bool {
        !self.is_fresh()
    }

    /// Time since the value was stored.
    pub fn age(&self) -> Duration {
        Duration::from_millis(now_ms().saturating_sub(self.stored_at))
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl)
    }

    /// Decode the value into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> SyncResult<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }

    pub(crate) fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
