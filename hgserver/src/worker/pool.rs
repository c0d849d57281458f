//! Fixed-size pool of conversion workers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogStore, Tileset};
use crate::convert::{ConversionError, ConversionRequest, Converter};
use crate::dispatch::{ConversionJob, Dispatcher};
use crate::tilepack::TilePackWriter;

/// Default number of concurrent conversions.
pub const DEFAULT_NUM_WORKERS: usize = 2;

/// Default wall-clock limit for one conversion.
pub const DEFAULT_CONVERSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Directory under the artifact directory holding per-job scratch space.
pub const STAGING_DIR_NAME: &str = ".staging";

/// Everything a worker needs to run and publish a conversion.
pub struct WorkerContext {
    pub catalog: Arc<CatalogStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub converter: Arc<dyn Converter>,
    pub artifact_dir: PathBuf,
    pub conversion_timeout: Duration,
}

/// Outcome of a successful job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Published {
    /// The tileset is registered and servable.
    Ready(PathBuf),
    /// The source changed or vanished while converting; the artifact was
    /// deleted.
    Discarded,
}

impl WorkerContext {
    pub fn staging_dir(&self) -> PathBuf {
        self.artifact_dir.join(STAGING_DIR_NAME)
    }

    /// Convert, pack and publish one job.
    ///
    /// Scratch output lives in a temporary directory under the staging area
    /// and is removed on every path out of this function. The artifact only
    /// appears under its final name once it is complete.
    pub async fn run_job(&self, job: &ConversionJob) -> Result<Published, ConversionError> {
        let staging_root = self.staging_dir();
        tokio::fs::create_dir_all(&staging_root).await?;
        let scratch = tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(&staging_root)?;

        let request = ConversionRequest {
            source_path: job.source_path().to_path_buf(),
            kind: job.kind(),
            output_dir: scratch.path().join("out"),
        };
        tokio::fs::create_dir_all(&request.output_dir).await?;

        let output = tokio::time::timeout(self.conversion_timeout, self.converter.convert(&request))
            .await
            .map_err(|_| ConversionError::Timeout(self.conversion_timeout))??;

        let tiles_dir = request.tiles_dir();
        let staged = scratch.path().join("pack.hgtp");
        let resolutions = output.resolutions.clone();
        let staged_for_pack = staged.clone();
        let summary = tokio::task::spawn_blocking(move || {
            TilePackWriter::pack_directory(&tiles_dir, &resolutions, &staged_for_pack)
        })
        .await
        .map_err(|e| ConversionError::Io(std::io::Error::other(e)))?
        .map_err(|e| ConversionError::MalformedOutput(e.to_string()))?;

        let tileset_id = job.fingerprint().tileset_id();
        let artifact = self.artifact_dir.join(tileset_id.artifact_file_name());
        tokio::fs::rename(&staged, &artifact).await?;

        let tileset = Tileset::ready(
            &job.source,
            output.resolutions,
            output.bounds_info,
            artifact.clone(),
        );
        let catalog = Arc::clone(&self.catalog);
        let publish = tokio::task::spawn_blocking(move || catalog.record_tileset_ready(tileset));
        let published = match publish.await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match published {
            Ok(true) => {
                info!(
                    tileset = %tileset_id,
                    path = %job.source_path().display(),
                    tiles = summary.tiles,
                    bytes = summary.bytes,
                    "Tileset ready"
                );
                Ok(Published::Ready(artifact))
            }
            Ok(false) => {
                debug!(
                    tileset = %tileset_id,
                    path = %job.source_path().display(),
                    "Source changed during conversion, discarding result"
                );
                discard_artifact(&artifact).await;
                Ok(Published::Discarded)
            }
            Err(reason) => {
                discard_artifact(&artifact).await;
                Err(ConversionError::Publish(reason))
            }
        }
    }
}

async fn discard_artifact(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(artifact = %path.display(), error = %e, "Failed to remove discarded artifact");
    }
}

/// Handles of the running worker tasks.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `num_workers` workers pulling from the context's dispatcher.
    ///
    /// Workers exit when `shutdown` is cancelled. A job in flight at that
    /// point is abandoned; its converter process is killed when the future
    /// is dropped and the catalog re-queues it on the next start.
    pub fn spawn(
        num_workers: usize,
        context: Arc<WorkerContext>,
        shutdown: CancellationToken,
    ) -> Self {
        let num_workers = num_workers.max(1);
        info!(workers = num_workers, "Starting conversion workers");
        let handles = (0..num_workers)
            .map(|worker_id| {
                let context = Arc::clone(&context);
                let shutdown = shutdown.clone();
                tokio::spawn(worker_loop(worker_id, context, shutdown))
            })
            .collect();
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }
    }
}

async fn worker_loop(worker_id: usize, context: Arc<WorkerContext>, shutdown: CancellationToken) {
    debug!(worker_id, "Worker started");

    while let Some(job) = context.dispatcher.next_job(&shutdown).await {
        let started = Instant::now();
        info!(
            worker_id,
            path = %job.source_path().display(),
            kind = %job.kind(),
            attempt = job.attempts + 1,
            "Conversion started"
        );

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!(worker_id, path = %job.source_path().display(), "Conversion interrupted by shutdown");
                break;
            }
            result = context.run_job(&job) => result,
        };

        let dispatcher = Arc::clone(&context.dispatcher);
        let result = result.map(|_| ());
        match tokio::task::spawn_blocking(move || dispatcher.complete(job, result)).await {
            Ok(outcome) => debug!(
                worker_id,
                outcome = ?outcome,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Conversion finished"
            ),
            Err(e) => error!(worker_id, error = %e, "Failed to record conversion result"),
        }
    }

    debug!(worker_id, "Worker stopped");
}
