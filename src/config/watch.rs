//! Reload the config file when it changes on disk

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Config, SharedConfig};
use crate::orchestrator::OrchestratorHandle;

/// Editors write in bursts; wait for the file to settle before reloading
const SETTLE_DELAY: Duration = Duration::from_millis(300);

fn touches(event: &Event, file_name: &std::ffi::OsStr) -> bool {
    (event.kind.is_create() || event.kind.is_modify())
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name))
}

/// Parse the file and swap it in. A broken file keeps the previous config.
pub fn reload(path: &Path, shared: &SharedConfig) -> bool {
    match Config::load_from(path) {
        Ok(config) => {
            shared.replace(config);
            true
        }
        Err(e) => {
            warn!("Keeping previous configuration: {:#}", e);
            false
        }
    }
}

/// Watch `path` and request a reconcile after every successful reload.
///
/// The parent directory is watched so atomic replace-by-rename is seen.
/// Dropping the returned watcher stops watching.
pub fn watch_config(
    path: PathBuf,
    shared: SharedConfig,
    handle: OrchestratorHandle,
) -> Result<RecommendedWatcher> {
    let file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .context("Config path has no file name")?;
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .context("Config path has no parent directory")?;

    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if touches(&event, &file_name) => {
            let _ = tx.send(());
        }
        Ok(_) => {}
        Err(e) => warn!("Config watch error: {}", e),
    })
    .context("Failed to create config watcher")?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {:?}", dir))?;
    info!("Watching {:?} for changes", path);

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            // Coalesce the burst
            tokio::time::sleep(SETTLE_DELAY).await;
            while rx.try_recv().is_ok() {}

            debug!("Config file changed, reloading");
            if reload(&path, &shared) && !handle.request_reconcile() {
                break;
            }
        }
        debug!("Config watcher stopped");
    });

    Ok(watcher)
}
