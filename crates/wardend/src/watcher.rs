//! Catalog watcher: reloads the pattern catalog when its file changes.
//!
//! The parent directory is watched, not the file, so editors that save by
//! rename are still seen.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::engine::Warden;
use crate::runner::CommandRunner;

/// Quiet period before a burst of change events triggers one reload
pub const DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEvent {
    Changed(PathBuf),
}

pub struct CatalogWatcher {
    _watcher: RecommendedWatcher,
}

impl CatalogWatcher {
    pub fn new(path: &Path, tx: mpsc::UnboundedSender<CatalogEvent>) -> Result<Self> {
        let target = path.to_path_buf();
        let file_name = target.file_name().map(|n| n.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    return;
                }
                let relevant = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if relevant {
                    let _ = tx.send(CatalogEvent::Changed(target.clone()));
                }
            }
            Err(e) => warn!("Catalog watch error: {:?}", e),
        })?;

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching {}", dir.display()))?;

        info!("Watching catalog {}", path.display());
        Ok(Self { _watcher: watcher })
    }
}

/// Reload on every (debounced) change until the channel closes.
///
/// A rejected document leaves the running catalog in place.
pub async fn reload_loop<R: CommandRunner>(
    warden: Arc<Warden<R>>,
    mut rx: mpsc::UnboundedReceiver<CatalogEvent>,
) {
    while let Some(CatalogEvent::Changed(path)) = rx.recv().await {
        tokio::time::sleep(DEBOUNCE).await;
        while rx.try_recv().is_ok() {}

        match warden.reload_catalog() {
            Ok(n) => info!("Reloaded {} patterns after change to {}", n, path.display()),
            Err(e) => warn!("Keeping previous catalog, {} rejected: {}", path.display(), e),
        }
    }
}
