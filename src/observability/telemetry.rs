//! Telemetry sink interface.
//!
//! The sync layer reports retries, rate-limit rejections, cache strategy
//! outcomes, and queue failures to a [`TelemetrySink`]. Calls are
//! fire-and-forget: a sink returns nothing and the caller never waits on it.

use std::sync::{Arc, Mutex};

use crate::error::SyncError;
use crate::observability::metrics;

/// Attribute list attached to an event.
pub type Attributes<'a> = &'a [(&'static str, String)];

/// Event names emitted by the sync layer.
pub mod events {
    pub const RETRY: &str = "retry";
    pub const RATE_LIMITED: &str = "rate_limit_exceeded";
    pub const CACHE_FETCH: &str = "cache_fetch";
    pub const CACHE_REFRESH_FAILED: &str = "cache_refresh_failed";
    pub const QUEUE_ENQUEUED: &str = "queue_enqueued";
    pub const QUEUE_REPLAYED: &str = "queue_replayed";
    pub const QUEUE_ATTEMPT_FAILED: &str = "queue_attempt_failed";
    pub const QUEUE_PERMANENT_FAILURE: &str = "queue_permanent_failure";
}

/// Destination for telemetry events.
pub trait TelemetrySink: Send + Sync {
    fn record_event(&self, name: &str, attributes: Attributes<'_>);

    fn record_error(&self, name: &str, error: &SyncError, attributes: Attributes<'_>);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn record_event(&self, _name: &str, _attributes: Attributes<'_>) {}

    fn record_error(&self, _name: &str, _error: &SyncError, _attributes: Attributes<'_>) {}
}

/// Writes events to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record_event(&self, name: &str, attributes: Attributes<'_>) {
        tracing::debug!(event = name, attributes = ?attributes, "telemetry event");
    }

    fn record_error(&self, name: &str, error: &SyncError, attributes: Attributes<'_>) {
        if error.is_cancelled() {
            tracing::debug!(event = name, attributes = ?attributes, "operation cancelled");
        } else {
            tracing::warn!(
                event = name,
                error = %error,
                attributes = ?attributes,
                "telemetry error"
            );
        }
    }
}

/// Counts events and errors through the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSink;

impl TelemetrySink for MetricsSink {
    fn record_event(&self, name: &str, _attributes: Attributes<'_>) {
        metrics::record_telemetry_event(name, None);
    }

    fn record_error(&self, name: &str, error: &SyncError, _attributes: Attributes<'_>) {
        metrics::record_telemetry_event(name, Some(error.kind()));
    }
}

/// Forwards every call to several sinks.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.sinks.push(sink);
    }
}

impl TelemetrySink for FanoutSink {
    fn record_event(&self, name: &str, attributes: Attributes<'_>) {
        for sink in &self.sinks {
            sink.record_event(name, attributes);
        }
    }

    fn record_error(&self, name: &str, error: &SyncError, attributes: Attributes<'_>) {
        for sink in &self.sinks {
            sink.record_error(name, error, attributes);
        }
    }
}

/// An event captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub name: String,
    pub error: Option<String>,
    pub attributes: Vec<(String, String)>,
}

impl RecordedEvent {
    /// Look up an attribute value by key.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Keeps events in memory for inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events with the given name, in recording order.
    pub fn named(&self, name: &str) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.name == name)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.named(name).len()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    fn push(&self, event: RecordedEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

fn owned(attributes: Attributes<'_>) -> Vec<(String, String)> {
    attributes
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

impl TelemetrySink for MemorySink {
    fn record_event(&self, name: &str, attributes: Attributes<'_>) {
        self.push(RecordedEvent {
            name: name.to_string(),
            error: None,
            attributes: owned(attributes),
        });
    }

    fn record_error(&self, name: &str, error: &SyncError, attributes: Attributes<'_>) {
        self.push(RecordedEvent {
            name: name.to_string(),
            error: Some(error.to_string()),
            attributes: owned(attributes),
        });
    }
}
