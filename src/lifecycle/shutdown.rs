//! Shutdown coordination for background tasks.

use super::cancel::CancelToken;

/// Coordinator for stopping background tasks.
///
/// Connectivity listeners, cache sweepers, and probers each hold a token from
/// [`Shutdown::subscribe`] and exit their loops when it fires.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancelToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that fires when shutdown is triggered.
    pub fn subscribe(&self) -> CancelToken {
        self.token.clone()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        tracing::info!("Shutdown triggered");
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}
