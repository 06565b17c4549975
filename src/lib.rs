//! Client-side resilience and synchronization layer.
//!
//! Keeps an application usable and consistent over an unreliable network:
//! a two-tier cache with named fetch strategies, bounded retries with
//! jittered backoff, per-class token-bucket rate limiting, and a persisted
//! offline write queue replayed when connectivity returns.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod layer;
pub mod lifecycle;
pub mod limits;
pub mod observability;
pub mod queue;
pub mod resilience;
pub mod storage;

pub use cache::{CacheManager, CacheStore, FetchRequest, FetchStrategy};
pub use config::SyncConfig;
pub use connectivity::Connectivity;
pub use error::{FaultCode, SyncError, SyncResult};
pub use layer::{SyncLayer, WriteOutcome};
pub use lifecycle::{CancelToken, Shutdown};
pub use limits::RateLimiter;
pub use queue::{OfflineQueue, OperationExecutor, OperationKind, QueuedOperation};
pub use resilience::{BackoffPolicy, RetryExecutor};
pub use storage::{FileStore, MemoryStore, PersistedStore};
