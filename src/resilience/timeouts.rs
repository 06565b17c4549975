//! Per-attempt timeout enforcement.
//!
//! A timed-out attempt surfaces as [`SyncError::Timeout`], which carries the
//! `timeout` fault marker and is therefore retryable.

use std::future::Future;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};

/// Run `fut` with a deadline.
pub async fn with_timeout<T, F>(duration: Duration, fut: F) -> SyncResult<T>
where
    F: Future<Output = SyncResult<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(duration)),
    }
}

/// Run `fut` with an optional deadline.
pub async fn maybe_timeout<T, F>(duration: Option<Duration>, fut: F) -> SyncResult<T>
where
    F: Future<Output = SyncResult<T>>,
{
    match duration {
        Some(duration) => with_timeout(duration, fut).await,
        None => fut.await,
    }
}
