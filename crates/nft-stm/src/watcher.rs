//! Hot-reloadable engine holder and configuration file watcher.
//!
//! Operations take one `Arc<StmEngine>` snapshot at their start and use it to
//! the end; a reload swaps the snapshot for new operations only. A reload
//! that fails leaves the active engine in place.

use anyhow::{anyhow, Context, Result};
use arc_swap::ArcSwap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::loader::StmConfigLoader;
use crate::engine::StmEngine;
use crate::error::StmResult;

/// Quiet period after a change before reloading; editors write in bursts.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

/// Holder of the active engine.
pub struct SharedEngine {
    current: ArcSwap<StmEngine>,
    loader: StmConfigLoader,
    generation: AtomicU64,
}

impl SharedEngine {
    pub fn new(engine: StmEngine, loader: StmConfigLoader) -> Self {
        Self {
            current: ArcSwap::from_pointee(engine),
            loader,
            generation: AtomicU64::new(1),
        }
    }

    /// Load the initial engine from `path`. Fails if that configuration is
    /// invalid; there is no previous engine to fall back to.
    pub fn from_path(path: impl Into<PathBuf>) -> StmResult<Self> {
        let loader = StmConfigLoader::new(path);
        let engine = StmEngine::from_config(&loader.load()?)?;
        Ok(Self::new(engine, loader))
    }

    /// Snapshot of the active engine for one operation.
    pub fn load(&self) -> Arc<StmEngine> {
        self.current.load_full()
    }

    /// Rebuild the engine from the configuration file and swap it in.
    ///
    /// Returns the new generation. On failure the active engine is kept.
    pub fn reload(&self) -> StmResult<u64> {
        let engine = match self
            .loader
            .load()
            .and_then(|dto| StmEngine::from_config(&dto))
        {
            Ok(engine) => engine,
            Err(e) => {
                warn!(
                    path = %self.loader.path().display(),
                    error = %e,
                    "Configuration reload failed, keeping active engine"
                );
                return Err(e);
            }
        };

        self.current.store(Arc::new(engine));
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            path = %self.loader.path().display(),
            generation,
            "Configuration reloaded"
        );
        Ok(generation)
    }

    /// Number of engines installed so far, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn config_path(&self) -> &Path {
        self.loader.path()
    }
}

/// Watches the configuration file and reloads the shared engine on change.
/// Dropping the watcher stops watching.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    /// Start watching. Must be called from within a tokio runtime.
    pub fn spawn(shared: Arc<SharedEngine>) -> Result<Self> {
        let path = shared.config_path().to_path_buf();
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| anyhow!("config path {} has no file name", path.display()))?;
        // Watch the directory: editors often replace the file by rename.
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => warn!(error = %e, "Config watch error"),
        })
        .context("failed to create config watcher")?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", dir.display()))?;

        info!(path = %path.display(), "Watching state machine configuration");
        let task = tokio::spawn(reload_loop(shared, rx, file_name));

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn reload_loop(
    shared: Arc<SharedEngine>,
    mut rx: mpsc::UnboundedReceiver<Event>,
    file_name: OsString,
) {
    while let Some(event) = rx.recv().await {
        if !touches_config(&event, &file_name) {
            continue;
        }
        debug!(kind = ?event.kind, "Configuration file changed");

        tokio::time::sleep(RELOAD_DEBOUNCE).await;
        while rx.try_recv().is_ok() {}

        let _ = shared.reload();
    }
}

fn touches_config(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}
