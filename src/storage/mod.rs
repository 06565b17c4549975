//! Persisted key/value storage.
//!
//! The cache's durable tier and the offline queue both sit on a
//! [`PersistedStore`]. The core never assumes a particular backend; the host
//! supplies device storage, and the crate ships an in-memory store for tests
//! and a directory-backed store for desktop and CLI use.

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::error::SyncResult;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Durable key/value interface.
///
/// Implementations must be safe for concurrent use. A `put` replaces the
/// whole value; readers never observe a partially written value.
#[async_trait]
pub trait PersistedStore: Send + Sync {
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> SyncResult<()>;

    async fn delete(&self, key: &str) -> SyncResult<()>;

    async fn keys(&self) -> SyncResult<Vec<String>>;
}
