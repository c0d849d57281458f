//! Polling watcher daemon.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::scan::{scan_tree, ScanOptions};
use crate::catalog::{CatalogError, CatalogStore, FileKind, Fingerprint, SourceFile, UpsertOutcome};
use crate::dispatch::{ConversionJob, Dispatcher};

/// Default interval between scans.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default maximum directory depth below the watch root.
pub const DEFAULT_MAX_DEPTH: usize = 16;

/// Default time a file may be missing before its tilesets are removed.
pub const DEFAULT_REMOVAL_GRACE: Duration = Duration::from_secs(30);

/// Watcher settings.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub root: PathBuf,
    pub poll_interval: Duration,
    pub max_depth: usize,
    pub removal_grace: Duration,
    /// Directories under the root that are never scanned.
    pub exclude: Vec<PathBuf>,
}

impl WatcherConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_depth: DEFAULT_MAX_DEPTH,
            removal_grace: DEFAULT_REMOVAL_GRACE,
            exclude: Vec::new(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(10));
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    pub fn with_removal_grace(mut self, grace: Duration) -> Self {
        self.removal_grace = grace;
        self
    }

    pub fn with_exclude(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exclude.push(dir.into());
        self
    }
}

/// Why a tick could not complete.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("cannot scan watch root {root}: {source}")]
    Scan {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// What one tick observed and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub scanned: usize,
    pub added: usize,
    pub changed: usize,
    /// New or changed files of an unrecognised kind.
    pub unknown: usize,
    /// Files newly noticed as missing.
    pub missing: usize,
    /// Files removed after the grace period.
    pub removed: usize,
    pub enqueued: usize,
    pub errors: usize,
}

impl TickReport {
    pub fn has_changes(&self) -> bool {
        self.added + self.changed + self.missing + self.removed + self.enqueued > 0
    }
}

/// Reconciles the watch root with the catalog and feeds the dispatcher.
pub struct Watcher {
    config: WatcherConfig,
    catalog: Arc<CatalogStore>,
    dispatcher: Arc<Dispatcher>,
}

impl Watcher {
    pub fn new(
        config: WatcherConfig,
        catalog: Arc<CatalogStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            catalog,
            dispatcher,
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Run one scan and reconcile it with the catalog.
    ///
    /// Every present file is upserted, absent files are flagged missing and
    /// removed once their grace period has passed, and every file version
    /// still lacking a tileset is submitted. Submission is idempotent, so
    /// this also resumes work left over from a previous run.
    ///
    /// The catalog changes of one tick are committed as a single
    /// transaction, and newly queued jobs as a second one.
    ///
    /// Blocking: performs filesystem I/O.
    pub fn tick(&self) -> Result<TickReport, WatchError> {
        let now = Utc::now();
        let scan_options = ScanOptions {
            max_depth: self.config.max_depth,
            exclude: self.config.exclude.clone(),
        };
        let scan = scan_tree(&self.config.root, &scan_options).map_err(|source| {
            WatchError::Scan {
                root: self.config.root.clone(),
                source,
            }
        })?;

        let mut report = TickReport {
            scanned: scan.files.len(),
            errors: scan.errors,
            ..TickReport::default()
        };
        let seen: HashSet<PathBuf> = scan.files.iter().map(|f| f.path.clone()).collect();

        // Classify before the transaction; sniffing reads file headers
        let known: HashMap<PathBuf, SourceFile> = self
            .catalog
            .get_source_files()
            .into_iter()
            .map(|s| (s.path.clone(), s))
            .collect();
        let mut observed = Vec::with_capacity(scan.files.len());
        for file in scan.files {
            let fingerprint = Fingerprint::compute(&file.path, file.size, file.modified);
            let kind = match known.get(&file.path) {
                Some(known) if known.fingerprint == fingerprint => known.kind,
                _ => match FileKind::detect(&file.path) {
                    Ok(kind) => kind,
                    Err(e) => {
                        debug!(path = %file.path.display(), error = %e, "Cannot classify file");
                        report.errors += 1;
                        continue;
                    }
                },
            };
            observed.push(SourceFile::new(file.path, file.size, file.modified, kind));
        }

        let grace = self.config.removal_grace;
        let removed = self.catalog.transaction(|tx| {
            for source in observed {
                let path = source.path.clone();
                let kind = source.kind;
                let current = source.fingerprint.clone();
                match tx.upsert_source_file(source) {
                    UpsertOutcome::Added => {
                        report.added += 1;
                        info!(path = %path.display(), kind = %kind, "New file");
                    }
                    UpsertOutcome::Changed { previous } => {
                        report.changed += 1;
                        info!(
                            path = %path.display(),
                            previous = %previous.short(),
                            current = %current.short(),
                            "File changed"
                        );
                    }
                    UpsertOutcome::Unchanged => continue,
                }
                if !kind.is_convertible() {
                    report.unknown += 1;
                    debug!(path = %path.display(), "Unrecognised file kind, not converting");
                }
            }

            for path in tx.source_paths() {
                if !seen.contains(&path) && tx.mark_missing(&path, now) {
                    report.missing += 1;
                    info!(
                        path = %path.display(),
                        grace_secs = grace.as_secs(),
                        "File missing"
                    );
                }
            }

            let mut removed = Vec::new();
            for path in tx.expired_missing(grace, now) {
                if tx.remove_source_file(&path) {
                    removed.push(path);
                }
            }
            Ok(removed)
        })?;

        report.removed = removed.len();
        for path in &removed {
            self.dispatcher.cancel_path(path);
        }

        let jobs = self
            .catalog
            .pending_conversions()
            .into_iter()
            .map(ConversionJob::resume);
        report.enqueued = self
            .dispatcher
            .submit_all(jobs)
            .iter()
            .filter(|outcome| outcome.is_queued())
            .count();

        Ok(report)
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// The first tick happens one interval after start; callers run an
    /// initial [`Watcher::tick`] themselves during startup.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            root = %self.config.root.display(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_depth = self.config.max_depth,
            "Watcher daemon starting"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Watcher daemon shutting down");
                    break;
                }

                _ = interval.tick() => {
                    let watcher = Arc::clone(&self);
                    match tokio::task::spawn_blocking(move || watcher.tick()).await {
                        Ok(Ok(report)) if report.has_changes() => {
                            info!(
                                scanned = report.scanned,
                                added = report.added,
                                changed = report.changed,
                                missing = report.missing,
                                removed = report.removed,
                                enqueued = report.enqueued,
                                "Watch tick"
                            );
                        }
                        Ok(Ok(report)) => {
                            debug!(scanned = report.scanned, "Watch tick, no changes");
                        }
                        Ok(Err(e)) => {
                            warn!(error = %e, "Watch tick failed, retrying next interval");
                        }
                        Err(e) => {
                            error!(error = %e, "Watch tick panicked");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TilesetStatus;
    use crate::dispatch::RetryPolicy;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn watcher(root: &Path, grace: Duration) -> (Arc<CatalogStore>, Arc<Dispatcher>, Watcher) {
        let catalog = Arc::new(CatalogStore::in_memory());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&catalog), RetryPolicy::default()));
        let config = WatcherConfig::new(root).with_removal_grace(grace);
        let watcher = Watcher::new(config, Arc::clone(&catalog), Arc::clone(&dispatcher));
        (catalog, dispatcher, watcher)
    }

    fn touch(path: &Path, body: &[u8]) {
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_new_files_are_recorded_and_enqueued() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("a.mcool"), b"matrix");
        touch(&temp.path().join("b.bw"), b"signal");
        touch(&temp.path().join("notes.txt"), b"hello");
        let (catalog, dispatcher, watcher) = watcher(temp.path(), DEFAULT_REMOVAL_GRACE);

        let report = watcher.tick().unwrap();

        assert_eq!(report.added, 3);
        assert_eq!(report.unknown, 1);
        assert_eq!(report.enqueued, 2);
        assert_eq!(catalog.get_source_files().len(), 3);
        assert_eq!(dispatcher.stats().queued, 2);
    }

    #[test]
    fn test_scan_commits_catalog_once_per_tick() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("data");
        fs::create_dir_all(&root).unwrap();
        for i in 0..300 {
            touch(&root.join(format!("sample{}.bw", i)), b"signal");
        }
        let catalog = Arc::new(CatalogStore::open(temp.path().join("catalog.json")).unwrap());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&catalog), RetryPolicy::default()));
        let watcher = Watcher::new(
            WatcherConfig::new(&root),
            Arc::clone(&catalog),
            Arc::clone(&dispatcher),
        );

        let first = watcher.tick().unwrap();

        assert_eq!(first.added, 300);
        assert_eq!(first.enqueued, 300);
        // One write for the scan, one for the queued jobs
        assert_eq!(catalog.snapshot_writes(), 2);

        let second = watcher.tick().unwrap();
        assert!(!second.has_changes());
        assert_eq!(catalog.snapshot_writes(), 2);

        for i in 0..100 {
            fs::remove_file(root.join(format!("sample{}.bw", i))).unwrap();
        }
        let third = watcher.tick().unwrap();
        assert_eq!(third.missing, 100);
        assert_eq!(catalog.snapshot_writes(), 3);
    }

    #[test]
    fn test_unchanged_tree_is_quiet() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("a.mcool"), b"matrix");
        let (_, _, watcher) = watcher(temp.path(), DEFAULT_REMOVAL_GRACE);

        watcher.tick().unwrap();
        let second = watcher.tick().unwrap();

        assert!(!second.has_changes());
        assert_eq!(second.scanned, 1);
    }

    #[test]
    fn test_rewrite_is_detected_as_change() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.bw");
        touch(&path, b"v1");
        let (catalog, dispatcher, watcher) = watcher(temp.path(), DEFAULT_REMOVAL_GRACE);
        watcher.tick().unwrap();

        touch(&path, b"version two");
        let report = watcher.tick().unwrap();

        assert_eq!(report.changed, 1);
        assert_eq!(dispatcher.stats().queued, 1);
        let recorded = catalog.get_source_files();
        assert_eq!(recorded[0].size, 11);
    }

    #[test]
    fn test_missing_file_is_kept_during_grace() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.bw");
        touch(&path, b"v1");
        let (catalog, _, watcher) = watcher(temp.path(), Duration::from_secs(3600));
        watcher.tick().unwrap();

        fs::remove_file(&path).unwrap();
        let report = watcher.tick().unwrap();

        assert_eq!(report.missing, 1);
        assert_eq!(report.removed, 0);
        assert_eq!(catalog.get_source_files().len(), 1);
        assert!(catalog.pending_conversions().is_empty());

        // A quick reappearance cancels the removal
        touch(&path, b"v1");
        watcher.tick().unwrap();
        assert!(catalog.get_source_files()[0].missing_since.is_none());
    }

    #[test]
    fn test_missing_file_removed_after_grace() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.bw");
        touch(&path, b"v1");
        let (catalog, dispatcher, watcher) = watcher(temp.path(), Duration::ZERO);
        watcher.tick().unwrap();

        fs::remove_file(&path).unwrap();
        let report = watcher.tick().unwrap();

        assert_eq!(report.removed, 1);
        assert!(catalog.get_source_files().is_empty());
        assert_eq!(dispatcher.stats().queued, 0);
    }

    #[test]
    fn test_unreadable_root_fails_without_marking_missing() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("mount");
        fs::create_dir_all(&root).unwrap();
        touch(&root.join("a.bw"), b"v1");
        let (catalog, _, watcher) = watcher(&root, Duration::ZERO);
        watcher.tick().unwrap();

        fs::remove_dir_all(&root).unwrap();

        assert!(matches!(watcher.tick(), Err(WatchError::Scan { .. })));
        assert_eq!(catalog.get_source_files().len(), 1);
        assert!(catalog.get_source_files()[0].missing_since.is_none());
    }

    #[test]
    fn test_stale_tileset_survives_change() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.bw");
        touch(&path, b"v1");
        let (catalog, _, watcher) = watcher(temp.path(), DEFAULT_REMOVAL_GRACE);
        watcher.tick().unwrap();
        let v1 = catalog.get_source_files().remove(0);
        let artifact = temp.path().join("art.hgtp");
        touch(&artifact, b"pack");
        catalog
            .record_tileset_ready(crate::catalog::Tileset::ready(
                &v1,
                vec![crate::catalog::Resolution::new(0, 1, 1)],
                serde_json::json!({}),
                artifact,
            ))
            .unwrap();

        touch(&path, b"v2 is longer");
        watcher.tick().unwrap();

        let listed = catalog.list_tilesets();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, TilesetStatus::Stale);
    }
}
