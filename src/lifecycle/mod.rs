//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Caller abort (cancel.rs):
//!     CancelToken::cancel → retry loop / drain pass stops → SyncError::Cancelled
//!
//! Shutdown (shutdown.rs):
//!     Shutdown::trigger → listener, sweeper, prober loops exit
//! ```

pub mod cancel;
pub mod shutdown;

pub use cancel::CancelToken;
pub use shutdown::Shutdown;
