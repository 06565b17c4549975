//! Cache subsystem.
//!
//! # Data Flow
//! ```text
//! fetch(request)
//!     → manager.rs (pick strategy)
//!     → store.rs (memory tier, then persisted tier)
//!     → On miss or network-first: rate limiter → retry executor → network op
//!     → store.rs (write both tiers)
//!     → stale-while-revalidate: detached refresh, joined per key
//!
//! Background:
//!     sweeper.rs → store.rs clear_expired
//! ```
//!
//! # Design Decisions
//! - The persisted tier is the source of truth; memory is a cache of it
//! - Per-key async locks serialize writers without blocking other keys
//! - Stale values stay readable for strategies that tolerate them

pub mod entry;
pub mod manager;
pub mod stats;
pub mod store;
pub mod strategy;
pub mod sweeper;

pub use entry::CacheEntry;
pub use manager::{CacheManager, FallbackOp, FetchRequest, NetworkOp};
pub use stats::CacheStats;
pub use store::CacheStore;
pub use strategy::FetchStrategy;
pub use sweeper::CacheSweeper;
