//! Watches the agent script and calls back on every file modification.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use crate::Result;

pub struct ScriptWatcher {
    _watcher: RecommendedWatcher,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ScriptWatcher {
    /// Start watching `path` (recursively). `on_change` runs on the watcher's
    /// own task, once per qualifying notification, one at a time.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(path: &Path, on_change: F) -> Result<Self>
    where
        F: FnMut(PathBuf) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (fs_tx, fs_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = fs_tx.send(res);
        })?;
        watcher.watch(path, RecursiveMode::Recursive)?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(fs_rx, cancel_rx, on_change));

        tracing::info!("Watching {} for changes", path.display());

        Ok(Self {
            _watcher: watcher,
            cancel_tx,
            task,
        })
    }

    /// Stop watching and wait until the task has exited. No callback runs
    /// after this returns.
    pub async fn stop(self) {
        let Self { _watcher: watcher, cancel_tx, task } = self;
        drop(watcher);
        let _ = cancel_tx.send(true);
        if let Err(e) = task.await {
            tracing::error!("Watcher task failed: {}", e);
        }
    }
}

async fn run_loop<F, Fut>(
    mut fs_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    mut cancel_rx: watch::Receiver<bool>,
    mut on_change: F,
) where
    F: FnMut(PathBuf) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        tokio::select! {
            // Cancellation wins over a notification that is already queued
            biased;
            _ = cancel_rx.changed() => break,
            res = fs_rx.recv() => {
                let Some(res) = res else { break };
                match res {
                    Ok(event) => {
                        if let Some(path) = modified_file(&event) {
                            tracing::info!("Script modified: {} - Reloading...", path.display());
                            on_change(path).await;
                        }
                    }
                    Err(e) => tracing::warn!("Watch error: {}", e),
                }
            }
        }
    }
}

/// The modified file for a qualifying event: a modification of something
/// that is not a directory.
fn modified_file(event: &Event) -> Option<PathBuf> {
    if !matches!(event.kind, EventKind::Modify(_)) {
        return None;
    }
    event.paths.iter().find(|p| !p.is_dir()).cloned()
}
