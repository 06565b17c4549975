//! Periodic expiry sweeps.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use super::store::CacheStore;
use crate::lifecycle::CancelToken;

/// Runs [`CacheStore::clear_expired`] on a fixed interval until shutdown.
pub struct CacheSweeper {
    store: Arc<CacheStore>,
    interval: Duration,
}

impl CacheSweeper {
    pub fn new(store: Arc<CacheStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn run(self, shutdown: CancelToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Cache sweeper starting");

        let mut ticker = time::interval(self.interval);
        // The first tick completes immediately; skip it so startup isn't
        // charged with a full sweep.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.store.clear_expired().await {
                        Ok(0) => {}
                        Ok(removed) => tracing::debug!(removed, "Sweep removed expired entries"),
                        Err(e) => tracing::warn!(error = %e, "Cache sweep failed"),
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
