//! In-memory persisted store.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::PersistedStore;
use crate::error::{SyncError, SyncResult};

/// A [`PersistedStore`] held in a concurrent map.
///
/// Survives nothing, but shares state across every component given the same
/// `Arc`, which is how tests simulate a process restart: build fresh
/// components over the same store. Writes can be made to fail to exercise
/// storage error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: DashMap<String, Vec<u8>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `put`/`delete` calls fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn check_writable(&self) -> SyncResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(SyncError::Storage("memory store is read-only".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PersistedStore for MemoryStore {
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        Ok(self.inner.get(key).map(|r| r.value().clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> SyncResult<()> {
        self.check_writable()?;
        self.inner.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        self.check_writable()?;
        self.inner.remove(key);
        Ok(())
    }

    async fn keys(&self) -> SyncResult<Vec<String>> {
        Ok(self.inner.iter().map(|r| r.key().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_operations() {
        let store = MemoryStore::new();
        assert!(store.get("a").await.unwrap().is_none());

        store.put("a", b"1".to_vec()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap(), b"1");
        assert_eq!(store.keys().await.unwrap(), vec!["a".to_string()]);

        store.delete("a").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(matches!(store.put("a", vec![]).await, Err(SyncError::Storage(_))));
        store.set_fail_writes(false);
        assert!(store.put("a", vec![]).await.is_ok());
    }
}
