//! Entity types owned by the catalog.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fingerprint::{Fingerprint, TilesetId};
use super::kind::{self, FileKind};

/// Errors raised by the catalog store.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The persisted snapshot cannot be trusted. Fatal at startup.
    #[error("catalog snapshot {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Reading or writing the snapshot failed.
    #[error("catalog I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot serialization failed.
    #[error("failed to serialize catalog: {0}")]
    Serialize(#[from] serde_json::Error),

    /// No tileset with this identifier.
    #[error("No such tileset with uuid: {0}")]
    TilesetNotFound(TilesetId),

    /// A tileset was reported ready before its artifact was in place.
    #[error("artifact {0} does not exist")]
    ArtifactMissing(PathBuf),
}

/// A file observed under the watch root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: PathBuf,
    pub size: u64,
    #[serde(with = "system_time_nanos")]
    pub modified: SystemTime,
    pub fingerprint: Fingerprint,
    pub kind: FileKind,
    pub filetype: String,
    /// Set while the file is absent from the watch root but still inside
    /// the removal grace period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_since: Option<DateTime<Utc>>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: SystemTime, kind: FileKind) -> Self {
        let path = path.into();
        let fingerprint = Fingerprint::compute(&path, size, modified);
        let filetype = kind::filetype(&path, kind);
        Self {
            path,
            size,
            modified,
            fingerprint,
            kind,
            filetype,
            missing_since: None,
        }
    }

    /// Display name: the file name without directories.
    pub fn name(&self) -> String {
        display_name(&self.path)
    }
}

/// One zoom level of a tileset's tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub zoom: u32,
    pub grid_width: u32,
    pub grid_height: u32,
}

impl Resolution {
    pub fn new(zoom: u32, grid_width: u32, grid_height: u32) -> Self {
        Self {
            zoom,
            grid_width,
            grid_height,
        }
    }

    /// Whether `(x, y)` lies inside this level's grid.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.grid_width && y < self.grid_height
    }
}

/// Check that a resolution ladder is usable: non-empty, strictly
/// increasing zoom levels, no empty grids.
pub fn validate_resolutions(resolutions: &[Resolution]) -> Result<(), String> {
    if resolutions.is_empty() {
        return Err("no resolutions".to_string());
    }
    for pair in resolutions.windows(2) {
        if pair[1].zoom <= pair[0].zoom {
            return Err(format!(
                "zoom levels must increase (found {} after {})",
                pair[1].zoom, pair[0].zoom
            ));
        }
    }
    if let Some(r) = resolutions
        .iter()
        .find(|r| r.grid_width == 0 || r.grid_height == 0)
    {
        return Err(format!("zoom {} has an empty grid", r.zoom));
    }
    Ok(())
}

/// Servability of a tileset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TilesetStatus {
    /// Built from the current version of its source file.
    Ready,
    /// Built from an older version; served until the replacement is ready.
    Stale,
}

impl TilesetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TilesetStatus::Ready => "ready",
            TilesetStatus::Stale => "stale",
        }
    }
}

/// A converted, servable tileset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tileset {
    pub id: TilesetId,
    pub fingerprint: Fingerprint,
    pub source_path: PathBuf,
    pub kind: FileKind,
    pub filetype: String,
    pub resolutions: Vec<Resolution>,
    pub bounds_info: serde_json::Value,
    pub artifact_path: PathBuf,
    pub status: TilesetStatus,
    pub created_at: DateTime<Utc>,
}

impl Tileset {
    /// Build a ready tileset for a converted source file version.
    pub fn ready(
        source: &SourceFile,
        resolutions: Vec<Resolution>,
        bounds_info: serde_json::Value,
        artifact_path: PathBuf,
    ) -> Self {
        Self {
            id: source.fingerprint.tileset_id(),
            fingerprint: source.fingerprint.clone(),
            source_path: source.path.clone(),
            kind: source.kind,
            filetype: source.filetype.clone(),
            resolutions,
            bounds_info,
            artifact_path,
            status: TilesetStatus::Ready,
            created_at: Utc::now(),
        }
    }

    /// Resolution record for a zoom level, if the tileset has one.
    pub fn resolution(&self, zoom: u32) -> Option<&Resolution> {
        self.resolutions.iter().find(|r| r.zoom == zoom)
    }

    pub fn max_zoom(&self) -> u32 {
        self.resolutions.iter().map(|r| r.zoom).max().unwrap_or(0)
    }

    pub fn name(&self) -> String {
        display_name(&self.source_path)
    }

    pub fn is_stale(&self) -> bool {
        self.status == TilesetStatus::Stale
    }
}

/// Lifecycle state of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Done,
    /// Failed, waiting for a retry.
    Failed,
    /// Failed permanently. Not retried until the file changes.
    Error,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Error => "error",
        }
    }

    /// Whether the job still needs a worker.
    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Running | JobState::Failed)
    }
}

/// Persisted record of the latest conversion job for a fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub fingerprint: Fingerprint,
    pub source_path: PathBuf,
    pub kind: FileKind,
    pub state: JobState,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Serialize `SystemTime` as integer nanoseconds since the Unix epoch.
mod system_time_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let nanos = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_nanos(nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_source_file_derives_fingerprint_and_filetype() {
        let modified = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let file = SourceFile::new("/data/sample.mcool", 42, modified, FileKind::Matrix);

        assert_eq!(
            file.fingerprint,
            Fingerprint::compute(Path::new("/data/sample.mcool"), 42, modified)
        );
        assert_eq!(file.filetype, "cooler");
        assert_eq!(file.name(), "sample.mcool");
    }

    #[test]
    fn test_source_file_serde_keeps_nanosecond_mtime() {
        let modified = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        let file = SourceFile::new("/data/a.bw", 1, modified, FileKind::SignalTrack);

        let json = serde_json::to_string(&file).unwrap();
        let back: SourceFile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, file);
    }

    #[test]
    fn test_validate_resolutions() {
        assert!(validate_resolutions(&[]).is_err());
        assert!(validate_resolutions(&[Resolution::new(0, 1, 1), Resolution::new(1, 2, 2)]).is_ok());
        assert!(validate_resolutions(&[Resolution::new(1, 1, 1), Resolution::new(1, 2, 2)]).is_err());
        assert!(validate_resolutions(&[Resolution::new(0, 0, 1)]).is_err());
    }

    #[test]
    fn test_tileset_resolution_lookup() {
        let source = SourceFile::new("/d/a.bw", 1, UNIX_EPOCH, FileKind::SignalTrack);
        let tileset = Tileset::ready(
            &source,
            vec![Resolution::new(0, 1, 1), Resolution::new(1, 2, 1)],
            serde_json::json!({}),
            PathBuf::from("/art/x.hgtp"),
        );

        assert_eq!(tileset.id, source.fingerprint.tileset_id());
        assert_eq!(tileset.max_zoom(), 1);
        assert!(tileset.resolution(1).unwrap().contains(1, 0));
        assert!(!tileset.resolution(1).unwrap().contains(2, 0));
        assert!(tileset.resolution(2).is_none());
    }

    #[test]
    fn test_pending_job_states() {
        assert!(JobState::Queued.is_pending());
        assert!(JobState::Failed.is_pending());
        assert!(!JobState::Done.is_pending());
        assert!(!JobState::Error.is_pending());
    }
}
