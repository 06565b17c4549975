//! Caller-driven cancellation.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{SyncError, SyncResult};

/// A cloneable cancellation flag.
///
/// Cancelling any clone cancels all of them. Cancellation is sticky: a token
/// observed after `cancel()` reports cancelled immediately.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Sender lives in the shared Arc; unreachable while self exists.
            std::future::pending::<()>().await;
        }
    }

    /// Run `fut` unless the token fires first.
    pub async fn run<F>(&self, fut: F) -> SyncResult<F::Output>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(SyncError::Cancelled),
            out = fut => Ok(out),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_is_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
        clone.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_aborts_pending_future() {
        let token = CancelToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = token
            .run(tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_completes_when_not_cancelled() {
        let token = CancelToken::new();
        assert_eq!(token.run(async { 7 }).await.unwrap(), 7);
    }
}
