//! Admission control.
//!
//! # Data Flow
//! ```text
//! Network operation requested:
//!     → rate_limit.rs (consume a token for the operation class)
//!     → allowed: proceed to the retry executor
//!     → denied: SyncError::RateLimited (terminal for this attempt)
//! ```

pub mod rate_limit;

pub use rate_limit::{classes, OnLimitExceeded, RateLimiter};
