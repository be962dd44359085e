//! File-watch driver for `netsnap watch`.
//!
//! Debounced change events bump a counter in a `tokio::sync::watch` channel,
//! so any number of events arriving while an extraction runs collapse into a
//! single pending rerun. Extraction happens on a blocking thread and only
//! touches the publisher after it completes.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use netsnap::Extraction;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::update::Updater;

/// Files whose change can alter a snapshot.
const WATCHED_EXTENSIONS: &[&str] = &["kicad_sch", "kicad_pro", "kicad_sym"];

/// Debounced watcher over a project directory.
pub struct ProjectWatcher {
    debouncer: Debouncer<RecommendedWatcher>,
    watched_path: PathBuf,
    changes: watch::Receiver<u64>,
}

impl ProjectWatcher {
    pub fn start(path: &Path, debounce: Duration) -> Result<Self> {
        let watched_path = path
            .canonicalize()
            .with_context(|| format!("Failed to canonicalize path: {}", path.display()))?;

        let (tx, rx) = watch::channel(0u64);
        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    if events.iter().any(|e| is_watched_file(&e.path)) {
                        tx.send_modify(|count| *count += 1);
                    }
                }
                Err(e) => error!("Watcher error: {:?}", e),
            }
        })
        .context("Failed to create file watcher debouncer")?;

        debouncer
            .watcher()
            .watch(&watched_path, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to start watching: {}", watched_path.display()))?;

        info!("Watching {}", watched_path.display());
        Ok(Self {
            debouncer,
            watched_path,
            changes: rx,
        })
    }

    pub fn watched_path(&self) -> &Path {
        &self.watched_path
    }

    /// Change counter, bumped once per debounced batch.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }
}

impl Drop for ProjectWatcher {
    fn drop(&mut self) {
        let _ = self.debouncer.watcher().unwatch(&self.watched_path);
    }
}

fn is_watched_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| WATCHED_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Run `update` once, then again after every batch of changes, until Ctrl-C.
pub async fn run(updater: Updater) -> Result<()> {
    let updater = Arc::new(updater);
    let watcher = ProjectWatcher::start(updater.dir(), updater.settings().debounce())?;
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    drive(updater, watcher.changes(), extract_project, shutdown).await;
    info!("Stopped watching {}", watcher.watched_path().display());
    Ok(())
}

fn extract_project(updater: &Updater) -> Result<Extraction> {
    Updater::extract(updater.dir(), updater.settings(), &updater.settings().extract_options())
}

/// Extract and commit once, then once per observed change until `shutdown`
/// resolves or `changes` closes. Changes arriving during an extraction are
/// folded into a single rerun; an extraction still running at shutdown is
/// never committed.
pub async fn drive<X, S>(
    updater: Arc<Updater>,
    mut changes: watch::Receiver<u64>,
    extract: X,
    shutdown: S,
) where
    X: Fn(&Updater) -> Result<Extraction> + Send + Sync + 'static,
    S: Future<Output = ()>,
{
    let extract = Arc::new(extract);
    tokio::pin!(shutdown);

    let mut reason = "initial";
    loop {
        let job = {
            let updater = Arc::clone(&updater);
            let extract = Arc::clone(&extract);
            tokio::task::spawn_blocking(move || extract(&updater))
        };

        tokio::select! {
            joined = job => {
                match joined {
                    Ok(Ok(extraction)) => {
                        if let Err(e) = updater.commit(extraction, reason) {
                            error!("{:#}", e);
                        }
                    }
                    // The previous snapshot stays current.
                    Ok(Err(e)) => warn!("{:#}", e),
                    Err(e) => error!("Extraction task failed: {}", e),
                }
            }
            _ = &mut shutdown => {
                info!("Interrupted; discarding in-flight extraction");
                return;
            }
        }

        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    info!("Watcher channel closed");
                    return;
                }
                changes.borrow_and_update();
                reason = "files changed";
            }
            _ = &mut shutdown => return,
        }
    }
}
