//! Active connectivity probing.
//!
//! # Responsibilities
//! - Periodically run a caller-supplied probe
//! - Flip the shared [`Connectivity`] flag based on the result

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time;

use super::monitor::Connectivity;
use crate::config::ConnectivityConfig;
use crate::lifecycle::CancelToken;

/// Answers "can we reach the backend right now?".
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

pub struct ConnectivityProber {
    probe: Arc<dyn ConnectivityProbe>,
    connectivity: Connectivity,
    interval: Duration,
    timeout: Duration,
}

impl ConnectivityProber {
    pub fn new(
        probe: Arc<dyn ConnectivityProbe>,
        connectivity: Connectivity,
        config: &ConnectivityConfig,
    ) -> Self {
        Self {
            probe,
            connectivity,
            interval: Duration::from_secs(config.probe_interval_secs),
            timeout: Duration::from_secs(config.probe_timeout_secs),
        }
    }

    pub async fn run(self, shutdown: CancelToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Connectivity prober starting"
        );

        let mut ticker = time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check().await;
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Connectivity prober received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run the probe once and record the result. A probe that overruns its
    /// timeout counts as offline.
    pub async fn check(&self) -> bool {
        let online = match time::timeout(self.timeout, self.probe.probe()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(
                    timeout_secs = self.timeout.as_secs(),
                    "Connectivity probe timed out"
                );
                false
            }
        };
        self.connectivity.set_online(online);
        online
    }
}
