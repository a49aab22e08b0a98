//! File watchers for hot reload.
//!
//! One watcher type serves both the consumer config file and the provider list
//! file; each change is re-parsed and the result pushed on a channel.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::{load_config, load_provider_list, ConfigError};
use crate::config::schema::ConsumerConfig;
use crate::provider::ProviderInfo;

type LoadFn<T> = Arc<dyn Fn(&Path) -> Result<T, ConfigError> + Send + Sync>;

/// Watches one file and pushes the re-parsed content on every change.
pub struct FileWatcher<T> {
    path: PathBuf,
    load: LoadFn<T>,
    update_tx: mpsc::UnboundedSender<T>,
}

/// Watches the consumer config file.
pub type ConfigWatcher = FileWatcher<ConsumerConfig>;

/// Watches a provider list file.
pub type ProviderFileWatcher = FileWatcher<Vec<ProviderInfo>>;

impl FileWatcher<ConsumerConfig> {
    pub fn config(path: &Path) -> (Self, mpsc::UnboundedReceiver<ConsumerConfig>) {
        Self::with_loader(path, Arc::new(load_config))
    }
}

impl FileWatcher<Vec<ProviderInfo>> {
    pub fn providers(path: &Path, protocol: &str) -> (Self, mpsc::UnboundedReceiver<Vec<ProviderInfo>>) {
        let protocol = protocol.to_string();
        Self::with_loader(path, Arc::new(move |p: &Path| load_provider_list(p, &protocol)))
    }
}

impl<T: Send + 'static> FileWatcher<T> {
    fn with_loader(path: &Path, load: LoadFn<T>) -> (Self, mpsc::UnboundedReceiver<T>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                load,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. Dropping the returned watcher stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();
        let load = self.load.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(path = ?path, "File change detected, reloading...");
                        match load(&path) {
                            Ok(update) => {
                                let _ = tx.send(update);
                            }
                            Err(e) => {
                                tracing::error!(path = ?path, error = %e, "Failed to reload file, keeping current state");
                            }
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "File watcher started");
        Ok(watcher)
    }
}
