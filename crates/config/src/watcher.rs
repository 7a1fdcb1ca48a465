//! Hot-reload configuration watcher

use crate::{validate_config, AppConfig, ConfigError, ConfigLoader, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Callback invoked with every successfully reloaded configuration
pub type ReloadHook = Arc<dyn Fn(&AppConfig) + Send + Sync>;

/// Configuration watcher that monitors a config file for changes
///
/// A reload only replaces the current configuration when the new file both
/// parses and validates; otherwise the last good configuration stays.
pub struct ConfigWatcher {
    config: Arc<RwLock<AppConfig>>,
    hooks: Arc<RwLock<Vec<ReloadHook>>>,
    path: PathBuf,
}

impl ConfigWatcher {
    /// Create a new config watcher
    ///
    /// Loads and validates the initial configuration from the specified path
    pub fn new(path: PathBuf) -> Result<Self> {
        let config = load_validated(&path)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            hooks: Arc::new(RwLock::new(Vec::new())),
            path,
        })
    }

    /// Get a clone of the current configuration
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Register a hook run after each successful reload, e.g. to push the
    /// new queue settings into a running queue
    pub fn on_reload<F>(&self, hook: F)
    where
        F: Fn(&AppConfig) + Send + Sync + 'static,
    {
        self.hooks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(hook));
    }

    /// Re-read the file now; returns whether the configuration was replaced
    pub fn reload(&self) -> bool {
        reload_into(&self.path, &self.config, &self.hooks)
    }

    /// Start watching the config file for changes
    ///
    /// Returns a join handle for the watcher task. The task will run until dropped.
    pub fn start_watching(&self) -> Result<JoinHandle<()>> {
        let config = Arc::clone(&self.config);
        let hooks = Arc::clone(&self.hooks);
        let path = self.path.clone();

        let (tx, mut rx) = mpsc::channel(100);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if let Err(e) = tx.blocking_send(event) {
                        error!(error = %e, "Failed to forward config file event");
                    }
                }
                Err(e) => error!(error = %e, "Config file watch error"),
            },
            notify::Config::default().with_poll_interval(Duration::from_secs(2)),
        )
        .map_err(|e| ConfigError::WatchError(e.to_string()))?;

        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::WatchError(e.to_string()))?;

        info!(path = %path.display(), "Started watching config file");

        let handle = tokio::spawn(async move {
            // the watcher stops when dropped
            let _watcher = watcher;

            while let Some(event) = rx.recv().await {
                if matches!(event.kind, EventKind::Modify(_)) {
                    debug!(path = %path.display(), "Config file modified, reloading");
                    reload_into(&path, &config, &hooks);
                }
            }

            debug!("Config watcher task stopped");
        });

        Ok(handle)
    }

    /// Create a watcher and start watching immediately
    pub fn watch(path: PathBuf) -> Result<(Self, JoinHandle<()>)> {
        let watcher = Self::new(path)?;
        let handle = watcher.start_watching()?;
        Ok((watcher, handle))
    }
}

fn load_validated(path: &Path) -> Result<AppConfig> {
    let config = ConfigLoader::from_file(path)?;
    validate_config(&config)?;
    Ok(config)
}

fn reload_into(
    path: &Path,
    config: &RwLock<AppConfig>,
    hooks: &RwLock<Vec<ReloadHook>>,
) -> bool {
    let new_config = match load_validated(path) {
        Ok(new_config) => new_config,
        Err(e) => {
            warn!(error = %e, "Failed to reload config, keeping previous");
            return false;
        }
    };

    {
        let mut guard = config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = new_config.clone();
    }
    info!(path = %path.display(), "Config reloaded");

    let hooks = hooks
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    for hook in hooks {
        hook(&new_config);
    }
    true
}
