//! The catalog store: single owner of source files, tilesets and job records.
//!
//! # Consistency
//!
//! Mutations are grouped into transactions. A transaction runs against a
//! copy of the state, the copy is persisted, and only then is it swapped in.
//! A failed write therefore leaves both memory and disk at the previous
//! state.
//!
//! Writers are serialized by a commit lock that is separate from the state
//! lock. The snapshot is written while only the commit lock is held, so
//! readers never wait on disk I/O; they keep seeing the previous state until
//! the swap.
//!
//! Each commit rewrites and fsyncs the whole snapshot. Callers applying many
//! changes at once batch them into one [`CatalogStore::transaction`], and
//! async callers commit through `spawn_blocking`.
//!
//! Artifact files of tilesets that a transaction drops are deleted after the
//! new state is committed.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::fingerprint::{Fingerprint, TilesetId};
use super::snapshot::{self, CatalogSnapshot, SNAPSHOT_VERSION};
use super::types::{CatalogError, JobRecord, JobState, SourceFile, Tileset, TilesetStatus};

/// Result of recording an observation of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First time this path was seen.
    Added,
    /// Same fingerprint as the recorded version.
    Unchanged,
    /// The file changed. The previous version's tileset, if any, is now stale.
    Changed { previous: Fingerprint },
}

/// A source file version that still needs a tileset.
#[derive(Debug, Clone)]
pub struct PendingConversion {
    pub source: SourceFile,
    /// Failed attempts already spent on this version.
    pub attempts: u32,
}

#[derive(Debug, Clone, Default)]
struct CatalogState {
    sources: BTreeMap<PathBuf, SourceFile>,
    tilesets: BTreeMap<TilesetId, Tileset>,
    jobs: BTreeMap<Fingerprint, JobRecord>,
}

impl CatalogState {
    fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        Self {
            sources: snapshot
                .sources
                .into_iter()
                .map(|s| (s.path.clone(), s))
                .collect(),
            tilesets: snapshot
                .tilesets
                .into_iter()
                .map(|t| (t.id.clone(), t))
                .collect(),
            jobs: snapshot
                .jobs
                .into_iter()
                .map(|j| (j.fingerprint.clone(), j))
                .collect(),
        }
    }

    fn to_snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            version: SNAPSHOT_VERSION,
            sources: self.sources.values().cloned().collect(),
            tilesets: self.tilesets.values().cloned().collect(),
            jobs: self.jobs.values().cloned().collect(),
        }
    }

    fn source_by_fingerprint(&self, fingerprint: &Fingerprint) -> Option<&SourceFile> {
        self.sources.values().find(|s| &s.fingerprint == fingerprint)
    }

    fn is_current(&self, fingerprint: &Fingerprint) -> bool {
        self.source_by_fingerprint(fingerprint).is_some()
    }

    fn expired_missing(&self, grace: Duration, now: DateTime<Utc>) -> Vec<PathBuf> {
        self.sources
            .values()
            .filter(|s| {
                s.missing_since.is_some_and(|since| {
                    (now - since).to_std().is_ok_and(|elapsed| elapsed >= grace)
                })
            })
            .map(|s| s.path.clone())
            .collect()
    }

    /// Remove every tileset of `path` except `keep`, returning their artifacts.
    fn drop_tilesets_for(&mut self, path: &Path, keep: Option<&TilesetId>) -> Vec<PathBuf> {
        let doomed: Vec<TilesetId> = self
            .tilesets
            .values()
            .filter(|t| t.source_path == path && Some(&t.id) != keep)
            .map(|t| t.id.clone())
            .collect();
        doomed
            .into_iter()
            .filter_map(|id| self.tilesets.remove(&id))
            .map(|t| t.artifact_path)
            .collect()
    }
}

/// A batch of mutations committed together by [`CatalogStore::transaction`].
///
/// Reads through the transaction see its own uncommitted changes. Nothing is
/// visible to other readers, or written to disk, until the closure returns
/// `Ok`.
pub struct CatalogTransaction<'a> {
    state: &'a mut CatalogState,
    doomed: Vec<PathBuf>,
    dirty: bool,
}

impl CatalogTransaction<'_> {
    /// The recorded version of a single path.
    pub fn source_file(&self, path: &Path) -> Option<&SourceFile> {
        self.state.sources.get(path)
    }

    /// Paths of every known source file.
    pub fn source_paths(&self) -> Vec<PathBuf> {
        self.state.sources.keys().cloned().collect()
    }

    /// Record an observation of a source file.
    ///
    /// When the fingerprint differs from the recorded one, the previous
    /// version's ready tileset becomes stale (replacing any older stale
    /// tileset) and its job record is dropped.
    pub fn upsert_source_file(&mut self, mut file: SourceFile) -> UpsertOutcome {
        let state = &mut *self.state;
        let outcome = match state.sources.get(&file.path) {
            None => UpsertOutcome::Added,
            Some(existing) if existing.fingerprint == file.fingerprint => {
                if existing.missing_since.is_none() {
                    return UpsertOutcome::Unchanged;
                }
                // Reappeared within the grace period; keep the recorded kind
                file.kind = existing.kind;
                file.filetype = existing.filetype.clone();
                UpsertOutcome::Unchanged
            }
            Some(existing) => {
                let previous = existing.fingerprint.clone();
                let previous_id = previous.tileset_id();
                let was_ready = state
                    .tilesets
                    .get(&previous_id)
                    .is_some_and(|t| t.status == TilesetStatus::Ready);
                if was_ready {
                    let doomed = state.drop_tilesets_for(&file.path, Some(&previous_id));
                    self.doomed.extend(doomed);
                    if let Some(tileset) = state.tilesets.get_mut(&previous_id) {
                        tileset.status = TilesetStatus::Stale;
                    }
                }
                state.jobs.remove(&previous);
                UpsertOutcome::Changed { previous }
            }
        };

        file.missing_since = None;
        state.sources.insert(file.path.clone(), file);
        self.dirty = true;
        outcome
    }

    /// Flag a source file as absent from the watch root.
    ///
    /// Returns `true` if the file was not already flagged.
    pub fn mark_missing(&mut self, path: &Path, now: DateTime<Utc>) -> bool {
        match self.state.sources.get_mut(path) {
            Some(source) if source.missing_since.is_none() => {
                source.missing_since = Some(now);
                self.dirty = true;
                true
            }
            _ => false,
        }
    }

    /// Paths that have been missing for at least `grace`.
    pub fn expired_missing(&self, grace: Duration, now: DateTime<Utc>) -> Vec<PathBuf> {
        self.state.expired_missing(grace, now)
    }

    /// Forget a source file together with its tilesets and job records.
    ///
    /// Artifacts are deleted once the transaction commits. Returns `false`
    /// if the path was unknown.
    pub fn remove_source_file(&mut self, path: &Path) -> bool {
        if self.state.sources.remove(path).is_none() {
            return false;
        }
        self.state.jobs.retain(|_, job| job.source_path != path);
        let doomed = self.state.drop_tilesets_for(path, None);

        info!(
            path = %path.display(),
            artifacts = doomed.len(),
            "Removed source file from catalog"
        );
        self.doomed.extend(doomed);
        self.dirty = true;
        true
    }

    /// Record the state of the conversion job for `fingerprint`.
    ///
    /// Ignored (returns `false`) when the fingerprint is no longer current.
    pub fn record_job_state(
        &mut self,
        fingerprint: &Fingerprint,
        job_state: JobState,
        attempts: u32,
        last_error: Option<String>,
    ) -> bool {
        let Some(source) = self.state.source_by_fingerprint(fingerprint) else {
            return false;
        };
        let record = JobRecord {
            fingerprint: fingerprint.clone(),
            source_path: source.path.clone(),
            kind: source.kind,
            state: job_state,
            attempts,
            last_error,
            updated_at: Utc::now(),
        };
        debug!(
            fingerprint = %fingerprint.short(),
            state = job_state.as_str(),
            attempts,
            "Job state recorded"
        );
        self.state.jobs.insert(fingerprint.clone(), record);
        self.dirty = true;
        true
    }

    fn publish_tileset(&mut self, mut tileset: Tileset) -> bool {
        let current = self
            .state
            .sources
            .get(&tileset.source_path)
            .is_some_and(|s| s.fingerprint == tileset.fingerprint);
        if !current {
            return false;
        }

        let doomed = self
            .state
            .drop_tilesets_for(&tileset.source_path, Some(&tileset.id));
        self.doomed.extend(doomed);

        let attempts = self
            .state
            .jobs
            .get(&tileset.fingerprint)
            .map(|j| j.attempts)
            .unwrap_or(0);
        self.state.jobs.insert(
            tileset.fingerprint.clone(),
            JobRecord {
                fingerprint: tileset.fingerprint.clone(),
                source_path: tileset.source_path.clone(),
                kind: tileset.kind,
                state: JobState::Done,
                attempts,
                last_error: None,
                updated_at: Utc::now(),
            },
        );

        tileset.status = TilesetStatus::Ready;
        self.state.tilesets.insert(tileset.id.clone(), tileset);
        self.dirty = true;
        true
    }
}

/// Durable catalog of everything the service knows about.
pub struct CatalogStore {
    state: RwLock<CatalogState>,
    /// Held by the single writer committing a transaction.
    commit: Mutex<()>,
    snapshot_path: Option<PathBuf>,
    snapshot_writes: AtomicU64,
}

impl CatalogStore {
    fn with_state(state: CatalogState, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            state: RwLock::new(state),
            commit: Mutex::new(()),
            snapshot_path,
            snapshot_writes: AtomicU64::new(0),
        }
    }

    /// Create a catalog that is never persisted.
    pub fn in_memory() -> Self {
        Self::with_state(CatalogState::default(), None)
    }

    /// Open the catalog persisted at `snapshot_path`.
    ///
    /// A missing snapshot yields an empty catalog. A snapshot that cannot be
    /// parsed or violates catalog invariants is reported as
    /// [`CatalogError::Corrupt`]. Tilesets whose artifact is gone are dropped,
    /// and jobs interrupted mid-run are put back in the queued state.
    pub fn open(snapshot_path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let snapshot_path = snapshot_path.into();
        let mut state = match snapshot::load(&snapshot_path)? {
            Some(snapshot) => CatalogState::from_snapshot(snapshot),
            None => {
                info!(path = %snapshot_path.display(), "No catalog snapshot, starting empty");
                CatalogState::default()
            }
        };

        let mut dirty = false;

        let missing: Vec<TilesetId> = state
            .tilesets
            .values()
            .filter(|t| !t.artifact_path.exists())
            .map(|t| t.id.clone())
            .collect();
        for id in missing {
            if let Some(tileset) = state.tilesets.remove(&id) {
                warn!(
                    tileset = %id,
                    artifact = %tileset.artifact_path.display(),
                    "Dropping tileset whose artifact is missing"
                );
                // Force a fresh conversion of the current version
                if tileset.status == TilesetStatus::Ready {
                    state.jobs.remove(&tileset.fingerprint);
                }
                dirty = true;
            }
        }

        for job in state.jobs.values_mut() {
            if job.state == JobState::Running {
                job.state = JobState::Queued;
                dirty = true;
            }
        }

        info!(
            sources = state.sources.len(),
            tilesets = state.tilesets.len(),
            jobs = state.jobs.len(),
            "Catalog loaded"
        );

        let store = Self::with_state(state, Some(snapshot_path));
        if dirty {
            let state = store.state.read();
            store.persist(&state)?;
        }
        Ok(store)
    }

    /// Load a snapshot for inspection without repairing or writing it.
    ///
    /// Safe to use while a service owns the catalog. Mutations on the
    /// returned store are never persisted.
    pub fn read_only(snapshot_path: &Path) -> Result<Self, CatalogError> {
        let state = snapshot::load(snapshot_path)?
            .map(CatalogState::from_snapshot)
            .unwrap_or_default();
        Ok(Self::with_state(state, None))
    }

    /// Number of snapshot writes since the store was opened.
    pub fn snapshot_writes(&self) -> u64 {
        self.snapshot_writes.load(Ordering::Relaxed)
    }

    fn persist(&self, state: &CatalogState) -> Result<(), CatalogError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        snapshot::save(path, &state.to_snapshot())?;
        self.snapshot_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Apply a batch of mutations as one transaction.
    ///
    /// The snapshot is written at most once, and only if something changed.
    /// If `f` returns an error nothing is committed.
    ///
    /// Blocking: writes and fsyncs the snapshot.
    pub fn transaction<R>(
        &self,
        f: impl FnOnce(&mut CatalogTransaction<'_>) -> Result<R, CatalogError>,
    ) -> Result<R, CatalogError> {
        let commit = self.commit.lock();
        let mut next = self.state.read().clone();
        let mut tx = CatalogTransaction {
            state: &mut next,
            doomed: Vec::new(),
            dirty: false,
        };
        let result = f(&mut tx)?;
        let CatalogTransaction { doomed, dirty, .. } = tx;
        if !dirty {
            return Ok(result);
        }

        self.persist(&next)?;
        *self.state.write() = next;
        drop(commit);

        remove_artifacts(&doomed);
        Ok(result)
    }

    // =========================================================================
    // Source files
    // =========================================================================

    /// Record an observation of a source file.
    ///
    /// See [`CatalogTransaction::upsert_source_file`].
    pub fn upsert_source_file(&self, file: SourceFile) -> Result<UpsertOutcome, CatalogError> {
        self.transaction(|tx| Ok(tx.upsert_source_file(file)))
    }

    /// All known source files.
    pub fn get_source_files(&self) -> Vec<SourceFile> {
        self.state.read().sources.values().cloned().collect()
    }

    /// The recorded version of a single path.
    pub fn source_file(&self, path: &Path) -> Option<SourceFile> {
        self.state.read().sources.get(path).cloned()
    }

    /// Flag a source file as absent from the watch root.
    ///
    /// Returns `true` if the file was not already flagged.
    pub fn mark_missing(&self, path: &Path, now: DateTime<Utc>) -> Result<bool, CatalogError> {
        self.transaction(|tx| Ok(tx.mark_missing(path, now)))
    }

    /// Paths that have been missing for at least `grace`.
    pub fn expired_missing(&self, grace: Duration, now: DateTime<Utc>) -> Vec<PathBuf> {
        self.state.read().expired_missing(grace, now)
    }

    /// Forget a source file together with its tilesets, job records and
    /// artifacts. Returns `false` if the path was unknown.
    pub fn remove_source_file(&self, path: &Path) -> Result<bool, CatalogError> {
        self.transaction(|tx| Ok(tx.remove_source_file(path)))
    }

    /// Whether `fingerprint` is the current version of some source file.
    pub fn is_current(&self, fingerprint: &Fingerprint) -> bool {
        self.state.read().is_current(fingerprint)
    }

    // =========================================================================
    // Tilesets
    // =========================================================================

    /// Register a converted tileset as ready.
    ///
    /// Returns `Ok(false)` when the tileset's fingerprint is no longer the
    /// current version of its source file; the caller owns the artifact and
    /// should discard it. On success any other tileset of the same source
    /// file is removed and its artifact deleted.
    pub fn record_tileset_ready(&self, tileset: Tileset) -> Result<bool, CatalogError> {
        if !tileset.artifact_path.exists() {
            return Err(CatalogError::ArtifactMissing(tileset.artifact_path));
        }
        self.transaction(|tx| Ok(tx.publish_tileset(tileset)))
    }

    /// Look up a tileset by identifier.
    pub fn lookup_tileset(&self, id: &TilesetId) -> Result<Tileset, CatalogError> {
        self.state
            .read()
            .tilesets
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::TilesetNotFound(id.clone()))
    }

    /// Ready and stale tilesets whose artifact is present on disk.
    pub fn list_tilesets(&self) -> Vec<Tileset> {
        let mut tilesets: Vec<Tileset> = self
            .state
            .read()
            .tilesets
            .values()
            .cloned()
            .collect();
        // Stat outside the lock
        tilesets.retain(|t| t.artifact_path.exists());
        tilesets.sort_by(|a, b| a.source_path.cmp(&b.source_path).then(a.id.cmp(&b.id)));
        tilesets
    }

    /// Artifact paths referenced by any tileset.
    pub fn artifact_paths(&self) -> HashSet<PathBuf> {
        self.state
            .read()
            .tilesets
            .values()
            .map(|t| t.artifact_path.clone())
            .collect()
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Record the state of the conversion job for `fingerprint`.
    ///
    /// Ignored (returns `false`) when the fingerprint is no longer current.
    pub fn record_job_state(
        &self,
        fingerprint: &Fingerprint,
        job_state: JobState,
        attempts: u32,
        last_error: Option<String>,
    ) -> Result<bool, CatalogError> {
        if !self.is_current(fingerprint) {
            return Ok(false);
        }
        self.transaction(|tx| Ok(tx.record_job_state(fingerprint, job_state, attempts, last_error)))
    }

    /// The job record for a fingerprint.
    pub fn job(&self, fingerprint: &Fingerprint) -> Option<JobRecord> {
        self.state.read().jobs.get(fingerprint).cloned()
    }

    /// All job records, most recently updated first.
    pub fn list_jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.state.read().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        jobs
    }

    /// Whether `fingerprint` still needs a conversion: it is current,
    /// convertible, has no tileset and has not failed permanently.
    pub fn needs_conversion(&self, fingerprint: &Fingerprint) -> bool {
        let state = self.state.read();
        let Some(source) = state.source_by_fingerprint(fingerprint) else {
            return false;
        };
        source.kind.is_convertible()
            && !state.tilesets.contains_key(&fingerprint.tileset_id())
            && !state
                .jobs
                .get(fingerprint)
                .is_some_and(|j| j.state == JobState::Error)
    }

    /// Present source files whose current version still needs a tileset.
    pub fn pending_conversions(&self) -> Vec<PendingConversion> {
        let state = self.state.read();
        state
            .sources
            .values()
            .filter(|s| s.missing_since.is_none() && s.kind.is_convertible())
            .filter(|s| !state.tilesets.contains_key(&s.fingerprint.tileset_id()))
            .filter_map(|s| {
                let job = state.jobs.get(&s.fingerprint);
                if job.is_some_and(|j| !j.state.is_pending()) {
                    return None;
                }
                Some(PendingConversion {
                    source: s.clone(),
                    attempts: job.map(|j| j.attempts).unwrap_or(0),
                })
            })
            .collect()
    }
}

fn remove_artifacts(paths: &[PathBuf]) {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(artifact = %path.display(), "Deleted artifact"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(artifact = %path.display(), error = %e, "Failed to delete artifact"),
        }
    }
}
