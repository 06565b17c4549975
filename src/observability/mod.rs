//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms via the metrics facade)
//!     → telemetry.rs (fire-and-forget events for the host application)
//! ```
//!
//! # Design Decisions
//! - Telemetry never feeds back into control flow
//! - Cancellation is reported at debug level, not as an error

pub mod logging;
pub mod metrics;
pub mod telemetry;

pub use telemetry::{
    FanoutSink, MemorySink, MetricsSink, NoopSink, RecordedEvent, TelemetrySink, TracingSink,
};
