//! Debounced re-parse of the configuration directory.
//!
//! Editors tend to write a file in several steps (truncate, write, close,
//! sometimes rename), so a single save produces a burst of filesystem events.
//! Events for the `config` file are collapsed until the directory has been
//! quiet for the debounce delay, then the whole [`Config`] is rebuilt and
//! handed to the caller.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::parser::CONFIG_FILE;
use super::{get_config, Config};
use crate::app::error::Result;

/// Shortest delay accepted between the last event and the re-parse.
pub const MIN_DEBOUNCE: Duration = Duration::from_millis(10);

/// Handle for a running watch. Dropping it stops watching.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConfigWatcher {
    /// Stop watching and wait for an in-progress re-parse to finish.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Config watcher task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Whether a filesystem event is a write to the `config` file.
pub fn is_config_change(event: &Event) -> bool {
    let is_write = matches!(
        event.kind,
        EventKind::Modify(_)
            | EventKind::Create(_)
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    );

    is_write
        && event
            .paths
            .iter()
            .any(|path| path.file_name().is_some_and(|name| name == CONFIG_FILE))
}

/// Call `on_fire` once per burst of events, after `delay` without new ones.
///
/// Returns when the event stream ends (after firing for any pending burst) or
/// when `shutdown` is cancelled (without firing).
pub async fn debounce_events<S, F, Fut>(
    mut events: S,
    delay: Duration,
    shutdown: CancellationToken,
    mut on_fire: F,
) where
    S: Stream<Item = ()> + Unpin,
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            event = events.next() => {
                if event.is_none() {
                    return;
                }
            }
        }

        let mut closed = false;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => break,
                event = events.next() => {
                    if event.is_none() {
                        closed = true;
                        break;
                    }
                }
            }
        }

        on_fire().await;
        if closed {
            return;
        }
    }
}

/// Watch `config_dir` and call `callback` with a freshly parsed [`Config`]
/// whenever its `config` file changes.
///
/// Must be called from within a Tokio runtime. Parse failures are logged and
/// skipped; the next change triggers another attempt.
pub fn watch_config<F>(
    config_dir: PathBuf,
    debounce: Duration,
    callback: F,
) -> Result<ConfigWatcher>
where
    F: Fn(Config) + Send + Sync + 'static,
{
    let (tx, rx) = futures::channel::mpsc::unbounded();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) if is_config_change(&event) => {
                debug!("Config change event: {:?}", event.kind);
                let _ = tx.unbounded_send(());
            }
            Ok(_) => {}
            Err(e) => warn!("Config watch error: {}", e),
        },
        notify::Config::default(),
    )?;
    watcher.watch(&config_dir, RecursiveMode::NonRecursive)?;
    info!("Watching {} for config changes", config_dir.display());

    let delay = debounce.max(MIN_DEBOUNCE);
    let shutdown = CancellationToken::new();
    let callback = Arc::new(callback);

    let reload = move || {
        let config_dir = config_dir.clone();
        let callback = Arc::clone(&callback);
        async move {
            match get_config(&config_dir).await {
                Ok(config) => {
                    info!(
                        "Reloaded AWS config: {} usable profiles",
                        config.usable_profiles.len()
                    );
                    callback(config);
                }
                Err(e) => warn!("Ignoring config change, failed to reload: {}", e),
            }
        }
    };

    let task = tokio::spawn(debounce_events(rx, delay, shutdown.clone(), reload));

    Ok(ConfigWatcher {
        _watcher: watcher,
        shutdown,
        task: Some(task),
    })
}
