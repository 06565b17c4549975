//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Network operation:
//!     → timeouts.rs (per-attempt deadline)
//!     → On failure: backoff.rs (classify, compute delay)
//!     → retries.rs (sleep, retry, or surface the last error)
//! ```
//!
//! # Design Decisions
//! - Retryability is decided by fault marker, not error type
//! - Caller cancellation is terminal and never consumes retry budget
//! - Jittered backoff prevents synchronized retry storms

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use backoff::{calculate_backoff, is_retryable, BackoffPolicy};
pub use retries::{retry_with_backoff, OnRetry, RetryContext, RetryExecutor};
pub use timeouts::{maybe_timeout, with_timeout};
