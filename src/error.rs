//! Error taxonomy for the sync layer.
//!
//! Every fallible operation in the crate returns [`SyncResult`]. Remote
//! failures carry a [`FaultCode`] so the backoff policy can classify them by
//! marker rather than by type identity.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type for sync layer operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Fault markers reported by the remote document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCode {
    Unavailable,
    ResourceExhausted,
    DeadlineExceeded,
    Cancelled,
    Internal,
    NetworkFailure,
    Timeout,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    InvalidArgument,
    Unauthenticated,
    Unknown,
}

impl FaultCode {
    /// Parse a marker string as reported by the remote SDK.
    ///
    /// Accepts both bare codes (`"unavailable"`) and namespaced ones
    /// (`"firestore/unavailable"`, `"auth/network-request-failed"`).
    pub fn from_marker(marker: &str) -> Self {
        let code = marker.rsplit('/').next().unwrap_or(marker).trim();
        match code.to_ascii_lowercase().as_str() {
            "unavailable" | "service-unavailable" => FaultCode::Unavailable,
            "resource-exhausted" => FaultCode::ResourceExhausted,
            "deadline-exceeded" => FaultCode::DeadlineExceeded,
            "cancelled" | "canceled" => FaultCode::Cancelled,
            "internal" => FaultCode::Internal,
            "network-request-failed" | "network-error" | "network" => FaultCode::NetworkFailure,
            "timeout" | "timed-out" => FaultCode::Timeout,
            "permission-denied" => FaultCode::PermissionDenied,
            "not-found" => FaultCode::NotFound,
            "already-exists" => FaultCode::AlreadyExists,
            "invalid-argument" => FaultCode::InvalidArgument,
            "unauthenticated" => FaultCode::Unauthenticated,
            _ => FaultCode::Unknown,
        }
    }

    /// Whether this marker denotes a transient fault.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FaultCode::Unavailable
                | FaultCode::ResourceExhausted
                | FaultCode::DeadlineExceeded
                | FaultCode::Cancelled
                | FaultCode::Internal
                | FaultCode::NetworkFailure
                | FaultCode::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FaultCode::Unavailable => "unavailable",
            FaultCode::ResourceExhausted => "resource-exhausted",
            FaultCode::DeadlineExceeded => "deadline-exceeded",
            FaultCode::Cancelled => "cancelled",
            FaultCode::Internal => "internal",
            FaultCode::NetworkFailure => "network-request-failed",
            FaultCode::Timeout => "timeout",
            FaultCode::PermissionDenied => "permission-denied",
            FaultCode::NotFound => "not-found",
            FaultCode::AlreadyExists => "already-exists",
            FaultCode::InvalidArgument => "invalid-argument",
            FaultCode::Unauthenticated => "unauthenticated",
            FaultCode::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the sync layer.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// A remote call failed with a classified fault.
    #[error("remote error [{code}]: {message}")]
    Remote { code: FaultCode, message: String },

    /// A single attempt exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The rate limiter rejected the call for this operation class.
    #[error("rate limit exceeded for '{class}'")]
    RateLimited { class: String },

    /// No strategy path produced a value and no fallback was supplied.
    #[error("cache miss for '{key}'")]
    CacheMiss { key: String },

    /// An offline operation exhausted its retry budget.
    #[error("queued operation {id} failed permanently after {attempts} attempts: {reason}")]
    QueuePermanentFailure {
        id: String,
        attempts: u32,
        reason: String,
    },

    /// The caller aborted the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Persisted store I/O failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration was rejected.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Build a remote error from a marker string and message.
    pub fn remote(marker: &str, message: impl Into<String>) -> Self {
        SyncError::Remote {
            code: FaultCode::from_marker(marker),
            message: message.into(),
        }
    }

    /// The fault marker carried by this error, if any.
    pub fn fault_code(&self) -> Option<FaultCode> {
        match self {
            SyncError::Remote { code, .. } => Some(*code),
            SyncError::Timeout(_) => Some(FaultCode::Timeout),
            _ => None,
        }
    }

    /// Caller-initiated cancellation. Not an error for logging purposes.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    /// Short stable label used for metrics and telemetry attributes.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Remote { .. } => "remote",
            SyncError::Timeout(_) => "timeout",
            SyncError::RateLimited { .. } => "rate_limited",
            SyncError::CacheMiss { .. } => "cache_miss",
            SyncError::QueuePermanentFailure { .. } => "queue_permanent_failure",
            SyncError::Cancelled => "cancelled",
            SyncError::Storage(_) => "storage",
            SyncError::Serialization(_) => "serialization",
            SyncError::Config(_) => "config",
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}
