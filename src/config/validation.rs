//! Configuration validation.
//!
//! Serde handles syntax; this pass checks value ranges and returns every
//! problem at once rather than stopping at the first.

use std::fmt;

use crate::config::schema::{RateLimitRule, SyncConfig};

/// A single semantic problem in a config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed config.
pub fn validate_config(config: &SyncConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.cache.default_ttl_secs == 0 {
        errors.push(ValidationError::new("cache.default_ttl_secs", "must be > 0"));
    }
    if config.cache.key_prefix.is_empty() {
        errors.push(ValidationError::new("cache.key_prefix", "must not be empty"));
    }

    let retries = &config.retries;
    if retries.base_delay_ms == 0 {
        errors.push(ValidationError::new("retries.base_delay_ms", "must be > 0"));
    }
    if retries.max_delay_ms < retries.base_delay_ms {
        errors.push(ValidationError::new(
            "retries.max_delay_ms",
            "must be >= base_delay_ms",
        ));
    }
    if retries.long_max_delay_ms < retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.long_max_delay_ms",
            "must be >= max_delay_ms",
        ));
    }

    check_rule("rate_limit.default_rule", &config.rate_limit.default_rule, &mut errors);
    for (class, rule) in &config.rate_limit.rules {
        check_rule(&format!("rate_limit.rules.{class}"), rule, &mut errors);
    }

    if config.queue.max_attempts == 0 {
        errors.push(ValidationError::new("queue.max_attempts", "must be > 0"));
    }
    if config.queue.storage_key.is_empty() {
        errors.push(ValidationError::new("queue.storage_key", "must not be empty"));
    }
    if config.queue.storage_key.starts_with(&config.cache.key_prefix) {
        errors.push(ValidationError::new(
            "queue.storage_key",
            "must not live under cache.key_prefix",
        ));
    }

    if config.connectivity.probe_enabled && config.connectivity.probe_interval_secs == 0 {
        errors.push(ValidationError::new(
            "connectivity.probe_interval_secs",
            "must be > 0 when probing is enabled",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_rule(field: &str, rule: &RateLimitRule, errors: &mut Vec<ValidationError>) {
    if rule.limit == 0 {
        errors.push(ValidationError::new(format!("{field}.limit"), "must be > 0"));
    }
    if rule.window_ms == 0 {
        errors.push(ValidationError::new(format!("{field}.window_ms"), "must be > 0"));
    }
}
