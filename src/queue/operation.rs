//! Queued write operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::entry::now_ms;
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write waiting to be replayed against the backend.
///
/// Only `attempts` changes after enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: Uuid,
    pub kind: OperationKind,
    /// Collection or entity type, e.g. `classes`.
    pub resource_kind: String,
    /// Target entity; absent for creates that let the backend assign one.
    pub resource_id: Option<String>,
    pub payload: serde_json::Value,
    /// Enqueue time (ms since epoch).
    pub enqueued_at: u64,
    pub attempts: u32,
    pub max_attempts: u32,
}

impl QueuedOperation {
    pub fn new(
        kind: OperationKind,
        resource_kind: impl Into<String>,
        resource_id: Option<String>,
        payload: serde_json::Value,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            resource_kind: resource_kind.into(),
            resource_id,
            payload,
            enqueued_at: now_ms(),
            attempts: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// `kind resource_kind/resource_id`, for logs.
    pub fn describe(&self) -> String {
        match &self.resource_id {
            Some(id) => format!("{} {}/{}", self.kind, self.resource_kind, id),
            None => format!("{} {}", self.kind, self.resource_kind),
        }
    }

    pub(crate) fn permanent_failure(&self, cause: &SyncError) -> SyncError {
        SyncError::QueuePermanentFailure {
            id: self.id.to_string(),
            attempts: self.attempts,
            reason: cause.to_string(),
        }
    }
}

/// Performs a queued write against the backend.
///
/// Called once per replay attempt; implementations should be idempotent
/// since an attempt may succeed remotely and still report failure.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, operation: &QueuedOperation) -> SyncResult<()>;
}

/// Lifecycle notifications for queued operations.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Enqueued(QueuedOperation),
    /// Confirmed by the backend and removed.
    Replayed(QueuedOperation),
    /// Failed but still queued; `operation.attempts` is the updated count.
    AttemptFailed {
        operation: QueuedOperation,
        error: SyncError,
    },
    /// Dropped after exhausting its attempts.
    PermanentFailure {
        operation: QueuedOperation,
        error: SyncError,
    },
}

impl QueueEvent {
    pub fn operation(&self) -> &QueuedOperation {
        match self {
            QueueEvent::Enqueued(op) | QueueEvent::Replayed(op) => op,
            QueueEvent::AttemptFailed { operation, .. }
            | QueueEvent::PermanentFailure { operation, .. } => operation,
        }
    }
}
