//! Retry executor.
//!
//! Runs an operation under a [`BackoffPolicy`]: attempt 0 runs immediately,
//! transient failures are retried after a jittered delay, and terminal
//! failures propagate on first occurrence. The executor guarantees at most
//! `max_retries + 1` invocations; idempotency is the caller's concern.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::lifecycle::CancelToken;
use crate::observability::metrics;
use crate::observability::telemetry::{events, TelemetrySink};
use crate::resilience::backoff::BackoffPolicy;
use crate::resilience::timeouts::maybe_timeout;

/// Callback invoked before each backoff sleep with the error and the number
/// of the upcoming retry (1-based).
pub type OnRetry = Arc<dyn Fn(&SyncError, u32) + Send + Sync>;

/// State of a single executor invocation.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    pub attempt: u32,
    pub last_error: Option<SyncError>,
}

/// Runs operations with bounded, jittered retries.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: BackoffPolicy,
    label: String,
    on_retry: Option<OnRetry>,
    attempt_timeout: Option<Duration>,
    cancel: Option<CancelToken>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl RetryExecutor {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            label: "operation".to_string(),
            on_retry: None,
            attempt_timeout: None,
            cancel: None,
            telemetry: None,
        }
    }

    /// Label used in logs, metrics, and telemetry.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&SyncError, u32) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(f));
        self
    }

    /// Deadline applied to each individual attempt.
    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Token that aborts the whole retry sequence, including backoff sleeps.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Execute `op`, retrying transient failures.
    ///
    /// Fails with the last error once retries are exhausted, immediately on a
    /// non-retryable error, or with [`SyncError::Cancelled`] if the cancel
    /// token fires.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut ctx = RetryContext::default();

        loop {
            let attempt = maybe_timeout(self.attempt_timeout, op());
            let result = match &self.cancel {
                Some(token) => token.run(attempt).await.and_then(|r| r),
                None => attempt.await,
            };

            let error = match result {
                Ok(value) => {
                    if ctx.attempt > 0 {
                        tracing::info!(
                            operation = %self.label,
                            attempt = ctx.attempt,
                            "operation recovered after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if error.is_cancelled()
                || ctx.attempt >= self.policy.max_retries
                || !self.policy.classify(&error)
            {
                if !error.is_cancelled() {
                    tracing::debug!(
                        operation = %self.label,
                        attempt = ctx.attempt,
                        error = %error,
                        "operation failed, not retrying"
                    );
                }
                return Err(error);
            }

            let delay = self.policy.delay(ctx.attempt);
            self.notify_retry(&error, ctx.attempt + 1, delay);
            ctx.last_error = Some(error);

            match &self.cancel {
                Some(token) => token.run(tokio::time::sleep(delay)).await?,
                None => tokio::time::sleep(delay).await,
            }
            ctx.attempt += 1;
        }
    }

    fn notify_retry(&self, error: &SyncError, retry: u32, delay: Duration) {
        tracing::warn!(
            operation = %self.label,
            retry,
            max_retries = self.policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "operation failed, retrying"
        );
        metrics::record_retry(&self.label);

        if let Some(sink) = &self.telemetry {
            sink.record_error(
                events::RETRY,
                error,
                &[
                    ("operation", self.label.clone()),
                    ("attempt", retry.to_string()),
                    ("delay_ms", delay.as_millis().to_string()),
                ],
            );
        }

        if let Some(cb) = &self.on_retry {
            if catch_unwind(AssertUnwindSafe(|| cb(error, retry))).is_err() {
                tracing::debug!(operation = %self.label, "on_retry callback panicked");
            }
        }
    }
}

/// Execute `op` under `policy` with no hooks.
pub async fn retry_with_backoff<T, F, Fut>(policy: BackoffPolicy, op: F) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    RetryExecutor::new(policy).execute(op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MemorySink;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> BackoffPolicy {
        BackoffPolicy::query().with_max_retries(max_retries)
    }

    /// Operation that fails `failures` times with a transient error, then succeeds.
    fn flaky(
        calls: Arc<AtomicU32>,
        failures: u32,
    ) -> impl FnMut() -> futures_util::future::Ready<SyncResult<&'static str>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            futures_util::future::ready(if n < failures {
                Err(SyncError::remote("unavailable", format!("failure {n}")))
            } else {
                Ok("done")
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let retries = Arc::new(AtomicU32::new(0));
        let r = retries.clone();

        let executor = RetryExecutor::new(policy(3)).with_on_retry(move |_, _| {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let value = executor.execute(flaky(calls.clone(), 2)).await.unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_with_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let retries = Arc::new(AtomicU32::new(0));
        let r = retries.clone();

        let executor = RetryExecutor::new(policy(2)).with_on_retry(move |_, _| {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let err = executor.execute(flaky(calls.clone(), 5)).await.unwrap_err();

        assert_eq!(err.to_string(), "remote error [unavailable]: failure 2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: SyncResult<()> = retry_with_backoff(policy(3), move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(SyncError::remote("permission-denied", "rules")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let executor = RetryExecutor::new(policy(1))
            .with_attempt_timeout(Some(Duration::from_millis(100)));

        let value = executor
            .execute(move || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                    }
                    Ok(n)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_backoff_sleep() {
        let token = CancelToken::new();
        let canceller = token.clone();
        let calls = Arc::new(AtomicU32::new(0));

        let executor = RetryExecutor::new(policy(3))
            .with_cancel(token)
            .with_on_retry(move |_, _| canceller.cancel());
        let err = executor.execute(flaky(calls.clone(), 10)).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_callback_is_swallowed() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(policy(1)).with_on_retry(|_, _| panic!("hook failed"));

        let value = executor.execute(flaky(calls, 1)).await.unwrap();
        assert_eq!(value, "done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_reach_telemetry() {
        let sink = Arc::new(MemorySink::new());
        let executor = RetryExecutor::new(policy(3))
            .with_label("load_profile")
            .with_telemetry(sink.clone());

        executor
            .execute(flaky(Arc::new(AtomicU32::new(0)), 2))
            .await
            .unwrap();

        let retries = sink.named(events::RETRY);
        assert_eq!(retries.len(), 2);
        assert_eq!(retries[1].attribute("attempt"), Some("2"));
        assert_eq!(retries[0].attribute("operation"), Some("load_profile"));
    }
}
