//! Connectivity subsystem.
//!
//! # Data Flow
//! ```text
//! host platform / prober.rs
//!     → monitor.rs (watch channel, transitions only)
//!     → subscribers (offline queue drains on reconnect)
//! ```

pub mod monitor;
pub mod prober;

pub use monitor::Connectivity;
pub use prober::{ConnectivityProbe, ConnectivityProber};
