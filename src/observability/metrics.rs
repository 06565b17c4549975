//! Metrics collection.
//!
//! Thin helpers over the `metrics` facade. No recorder is installed here;
//! the host application decides where metrics go.
//!
//! # Metrics
//! - `sync_retries_total` (counter): retry attempts by operation
//! - `sync_rate_limited_total` (counter): rejections by class
//! - `sync_cache_requests_total` (counter): fetch outcomes by strategy
//! - `sync_cache_entries` (gauge): in-memory entries
//! - `sync_queue_depth` (gauge): pending offline operations
//! - `sync_queue_replayed_total` (counter): replay outcomes
//! - `sync_queue_drain_duration_seconds` (histogram)
//! - `sync_telemetry_events_total` (counter): telemetry events by name and error kind

use std::time::Duration;

use metrics::{counter, gauge, histogram};

pub fn record_retry(operation: &str) {
    counter!("sync_retries_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_rate_limited(class: &str) {
    counter!("sync_rate_limited_total", "class" => class.to_string()).increment(1);
}

pub fn record_cache_outcome(strategy: &str, outcome: &str) {
    counter!(
        "sync_cache_requests_total",
        "strategy" => strategy.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_cache_size(entries: usize) {
    gauge!("sync_cache_entries").set(entries as f64);
}

pub fn record_queue_depth(depth: usize) {
    gauge!("sync_queue_depth").set(depth as f64);
}

pub fn record_queue_replay(outcome: &str) {
    counter!("sync_queue_replayed_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_drain_duration(elapsed: Duration) {
    histogram!("sync_queue_drain_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_telemetry_event(name: &str, error_kind: Option<&str>) {
    counter!(
        "sync_telemetry_events_total",
        "event" => name.to_string(),
        "error" => error_kind.unwrap_or("none").to_string()
    )
    .increment(1);
}
