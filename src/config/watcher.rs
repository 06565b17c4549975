//! Configuration file watcher for hot reload.
//!
//! Watches the file's parent directory rather than the file itself, since
//! editors often save by writing a new file and renaming it over the old one.
//! Reloads that parse to the current configuration are not forwarded.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::SyncConfig;

pub struct ConfigWatcher {
    path: PathBuf,
    poll_interval: Duration,
    update_tx: mpsc::UnboundedSender<SyncConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver of validated configurations.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<SyncConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            poll_interval: Duration::from_secs(2),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Poll interval for platforms without native file events.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Start watching. Updates stop when the returned watcher is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let file_name: Option<OsString> = self.path.file_name().map(|n| n.to_os_string());
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // Seed with the current file so a touch without edits is ignored.
        let last: Arc<Mutex<Option<serde_json::Value>>> = Arc::new(Mutex::new(
            load_config(&self.path)
                .ok()
                .and_then(|c| serde_json::to_value(c).ok()),
        ));

        let tx = self.update_tx;
        let path = self.path.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = ?e, "Config watch error");
                        return;
                    }
                };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                let touches_config = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if !touches_config {
                    return;
                }

                match load_config(&path) {
                    Ok(config) => {
                        let encoded = serde_json::to_value(&config).ok();
                        let mut last = match last.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        if encoded.is_some() && *last == encoded {
                            tracing::trace!("Config file touched without changes");
                            return;
                        }
                        *last = encoded;
                        tracing::info!(path = ?path, "Config file changed, reloading");
                        let _ = tx.send(config);
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            "Failed to reload config, keeping current configuration"
                        );
                    }
                }
            },
            Config::default().with_poll_interval(self.poll_interval),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}
