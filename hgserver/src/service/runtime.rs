//! Service startup and lifecycle.

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ServiceConfig, ServiceError};
use crate::api::{self, ApiState};
use crate::catalog::{CatalogStore, CATALOG_FILE_NAME};
use crate::convert::Converter;
use crate::dispatch::Dispatcher;
use crate::tilepack::TILE_PACK_EXTENSION;
use crate::watcher::{WatchError, Watcher, WatcherConfig};
use crate::worker::{WorkerContext, WorkerPool, STAGING_DIR_NAME};

/// Entry point for running the service.
pub struct HgService;

impl HgService {
    /// Validate the environment and start every component.
    ///
    /// Startup order:
    ///
    /// 1. Check the watch root and make sure the artifact directory is
    ///    writable
    /// 2. Load the catalog; a corrupt snapshot is fatal
    /// 3. Delete unreferenced artifacts and leftover staging directories
    /// 4. Reconcile the watch root once, queueing anything unconverted
    /// 5. Bind the API listener, then spawn the watcher, workers and API
    ///
    /// Nothing is spawned if any step fails.
    pub async fn start(
        config: ServiceConfig,
        converter: Arc<dyn Converter>,
    ) -> Result<ServiceHandle, ServiceError> {
        info!(
            root = %config.watch_root().display(),
            artifact_dir = %config.artifact_dir().display(),
            workers = config.num_workers(),
            "Starting hgserver"
        );

        let watch_root = check_watch_root(config.watch_root())?;
        let artifact_dir = prepare_artifact_dir(config.artifact_dir())?;

        let catalog = Arc::new(CatalogStore::open(artifact_dir.join(CATALOG_FILE_NAME))?);
        let removed = remove_orphans(&artifact_dir, &catalog.artifact_paths());
        if removed > 0 {
            info!(removed, "Removed orphaned artifacts");
        }

        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&catalog), *config.retry()));

        let watcher_config = WatcherConfig::new(&watch_root)
            .with_poll_interval(config.poll_interval())
            .with_max_depth(config.max_depth())
            .with_removal_grace(config.removal_grace())
            .with_exclude(&artifact_dir);
        let watcher = Arc::new(Watcher::new(
            watcher_config,
            Arc::clone(&catalog),
            Arc::clone(&dispatcher),
        ));

        let initial = {
            let watcher = Arc::clone(&watcher);
            tokio::task::spawn_blocking(move || watcher.tick())
                .await
                .map_err(|e| ServiceError::IoError(io::Error::other(e)))?
        };
        let report = initial.map_err(|e| match e {
            WatchError::Scan { root, source } => ServiceError::WatchRoot {
                path: root,
                reason: source.to_string(),
            },
            WatchError::Catalog(e) => ServiceError::Catalog(e),
        })?;
        info!(
            scanned = report.scanned,
            added = report.added,
            changed = report.changed,
            enqueued = report.enqueued,
            "Initial scan complete"
        );

        let addr = config.api_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServiceError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();

        let watcher_task = tokio::spawn(Arc::clone(&watcher).run(shutdown.clone()));

        let context = Arc::new(WorkerContext {
            catalog: Arc::clone(&catalog),
            dispatcher: Arc::clone(&dispatcher),
            converter,
            artifact_dir,
            conversion_timeout: config.conversion_timeout(),
        });
        let workers = WorkerPool::spawn(config.num_workers(), context, shutdown.clone());

        let api_task = tokio::spawn(api::serve(
            listener,
            ApiState::new(Arc::clone(&catalog)),
            shutdown.clone(),
        ));

        info!(%local_addr, "hgserver started");

        Ok(ServiceHandle {
            local_addr,
            catalog,
            dispatcher,
            shutdown,
            watcher_task,
            workers,
            api_task,
        })
    }
}

/// A running service.
///
/// Dropping the handle does not stop the service; call
/// [`ServiceHandle::stop`] or cancel the shutdown token and
/// [`ServiceHandle::wait`].
pub struct ServiceHandle {
    local_addr: SocketAddr,
    catalog: Arc<CatalogStore>,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
    watcher_task: JoinHandle<()>,
    workers: WorkerPool,
    api_task: JoinHandle<io::Result<()>>,
}

impl ServiceHandle {
    /// Address the API server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn catalog(&self) -> &Arc<CatalogStore> {
        &self.catalog
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Token cancelled when the service shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal every component to stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the service has stopped.
    ///
    /// Returns once the API server exits, which happens after shutdown is
    /// signalled or if serving fails. The remaining components are then
    /// stopped and joined.
    pub async fn wait(self) -> Result<(), ServiceError> {
        let api_result = self.api_task.await;
        self.shutdown.cancel();

        if let Err(e) = self.watcher_task.await {
            error!(error = %e, "Watcher task panicked");
        }
        self.workers.join().await;

        let stats = self.dispatcher.stats();
        debug!(
            queued = stats.queued,
            backing_off = stats.backing_off,
            "Dispatcher state at shutdown"
        );
        info!("hgserver stopped");

        match api_result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ServiceError::IoError(e)),
            Err(e) => Err(ServiceError::IoError(io::Error::other(e))),
        }
    }

    /// Shut down and wait for every component to exit.
    pub async fn stop(self) -> Result<(), ServiceError> {
        self.shutdown();
        self.wait().await
    }
}

fn check_watch_root(root: &Path) -> Result<PathBuf, ServiceError> {
    let canonical = root.canonicalize().map_err(|e| ServiceError::WatchRoot {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !canonical.is_dir() {
        return Err(ServiceError::WatchRoot {
            path: root.to_path_buf(),
            reason: "not a directory".into(),
        });
    }
    Ok(canonical)
}

/// Create the artifact directory and prove it is writable.
fn prepare_artifact_dir(dir: &Path) -> Result<PathBuf, ServiceError> {
    let artifact_err = |source| ServiceError::ArtifactDir {
        path: dir.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(artifact_err)?;
    tempfile::NamedTempFile::new_in(dir).map_err(artifact_err)?;
    dir.canonicalize().map_err(artifact_err)
}

/// Delete tile packs the catalog does not reference and abandoned staging
/// output. Returns the number of tile packs removed.
fn remove_orphans(artifact_dir: &Path, known: &HashSet<PathBuf>) -> usize {
    let staging = artifact_dir.join(STAGING_DIR_NAME);
    if staging.exists() {
        if let Err(e) = std::fs::remove_dir_all(&staging) {
            warn!(path = %staging.display(), error = %e, "Failed to clear staging directory");
        }
    }

    let entries = match std::fs::read_dir(artifact_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %artifact_dir.display(), error = %e, "Cannot list artifact directory");
            return 0;
        }
    };

    let mut removed = 0;
    for path in entries.flatten().map(|entry| entry.path()) {
        let is_pack = path
            .extension()
            .is_some_and(|ext| ext == TILE_PACK_EXTENSION);
        if !is_pack || known.contains(&path) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(artifact = %path.display(), "Removed orphaned artifact");
                removed += 1;
            }
            Err(e) => warn!(artifact = %path.display(), error = %e, "Failed to remove orphan"),
        }
    }
    removed
}
