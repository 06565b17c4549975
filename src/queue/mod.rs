//! Offline write queue subsystem.
//!
//! # Data Flow
//! ```text
//! write while offline (or after a transient failure)
//!     → offline.rs enqueue (append, persist whole list)
//!
//! connectivity restored / enqueue while online / startup restore
//!     → offline.rs drain (FIFO, one pass at a time)
//!     → retry executor → OperationExecutor
//!     → success: remove + persist
//!     → failure: attempts + 1, drop and report once exhausted
//! ```

pub mod offline;
pub mod operation;

pub use offline::{DrainReport, OfflineQueue};
pub use operation::{OperationExecutor, OperationKind, QueueEvent, QueuedOperation};
