//! Online/offline signal.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared connectivity flag.
///
/// Clones observe the same state. Subscribers are woken on transitions only;
/// setting the current value again is a no-op.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    /// Record the current state. Returns whether it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            if online {
                tracing::info!("Connectivity restored");
            } else {
                tracing::warn!("Connectivity lost");
            }
        }
        changed
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Wait for the next transition and return the new state.
    pub async fn changed(&self) -> bool {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as self, so this cannot fail.
        let _ = rx.changed().await;
        let online = *rx.borrow();
        online
    }

    /// Resolve once online (immediately if already).
    pub async fn wait_online(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|online| *online).await;
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::online()
    }
}
