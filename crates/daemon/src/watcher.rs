//! Background reload of the configuration file.
//!
//! The watcher observes the directory holding the configuration file rather
//! than the file itself, so editors that replace the file by renaming a
//! temporary one are still picked up.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::store::ConfigStore;

/// Default quiet period used to coalesce bursts of change events.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Handle to the background configuration watcher task.
///
/// Dropping the handle stops the watcher.
pub struct ConfigWatcher {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ConfigWatcher {
    /// Start watching the store's source file with the default debounce.
    pub fn spawn(store: Arc<ConfigStore>) -> Result<Self> {
        Self::spawn_with_debounce(store, DEFAULT_DEBOUNCE)
    }

    /// Start watching the store's source file.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_with_debounce(store: Arc<ConfigStore>, debounce: Duration) -> Result<Self> {
        let config_path = store
            .source()
            .context("Config store has no source file to watch")?
            .to_path_buf();
        let watch_dir = watch_dir(&config_path)?;

        let (notify_tx, notify_rx) = mpsc::channel::<notify::Result<Event>>(16);
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = notify_tx.blocking_send(res);
            },
            Config::default(),
        )
        .context("Failed to create config file watcher")?;

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch directory: {}", watch_dir.display()))?;

        info!(path = %config_path.display(), "Watching config file for changes");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_watcher(
            watcher,
            notify_rx,
            store,
            config_path,
            debounce,
            cancel.clone(),
        ));

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    /// A token that is cancelled when the watcher stops.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the watcher and wait for its task to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Config watcher task failed");
            }
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The directory to watch for a config file path.
fn watch_dir(config_path: &Path) -> Result<PathBuf> {
    let parent = match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    parent
        .canonicalize()
        .with_context(|| format!("Failed to resolve config directory: {}", parent.display()))
}

/// Whether an event concerns the config file.
fn is_config_event(event: &Event, config_path: &Path) -> bool {
    if !(event.kind.is_create() || event.kind.is_modify()) {
        return false;
    }
    let Some(file_name) = config_path.file_name() else {
        return false;
    };
    event.paths.iter().any(|p| p.file_name() == Some(file_name))
}

async fn run_watcher(
    // Kept alive for as long as the task runs.
    _watcher: RecommendedWatcher,
    mut notify_rx: mpsc::Receiver<notify::Result<Event>>,
    store: Arc<ConfigStore>,
    config_path: PathBuf,
    debounce: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Config watcher cancelled");
                break;
            }
            event = notify_rx.recv() => {
                match event {
                    Some(Ok(event)) if is_config_event(&event, &config_path) => {
                        // Let the writer finish, then swallow the rest of the burst.
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(debounce) => {}
                        }
                        while notify_rx.try_recv().is_ok() {}
                        reload(&store).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => warn!(error = %e, "Config file watcher error"),
                    None => {
                        debug!("Config watcher channel closed");
                        break;
                    }
                }
            }
        }
    }
}

async fn reload(store: &Arc<ConfigStore>) {
    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || store.reload()).await {
        Ok(Ok(summary)) => debug!(?summary, "Applied config file change"),
        Ok(Err(e)) => error!(error = %e, "Failed to reload config file, keeping previous configuration"),
        Err(e) => error!(error = %e, "Config reload task failed"),
    }
}
