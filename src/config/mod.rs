//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → SyncConfig (validated, immutable)
//!     → handed to SyncLayer at construction
//!
//! On change:
//!     watcher.rs detects modification
//!     → loader.rs loads new config
//!     → SyncLayer::apply_config swaps rate limit rules
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CacheConfig, ConnectivityConfig, ObservabilityConfig, QueueConfig, RateLimitConfig,
    RateLimitRule, RetryConfig, StorageConfig, SyncConfig,
};
