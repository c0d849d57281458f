//! On-disk catalog snapshot.
//!
//! The whole catalog is persisted as one JSON document. Writes go to a
//! sibling `.tmp` file which is fsynced and then renamed over the live
//! snapshot, so a crash leaves either the previous or the new snapshot,
//! never a torn one.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::types::{CatalogError, JobRecord, SourceFile, Tileset, TilesetStatus};

/// Snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub version: u32,
    #[serde(default)]
    pub sources: Vec<SourceFile>,
    #[serde(default)]
    pub tilesets: Vec<Tileset>,
    #[serde(default)]
    pub jobs: Vec<JobRecord>,
}

/// Load a snapshot. A missing file yields `Ok(None)`.
pub fn load(path: &Path) -> Result<Option<CatalogSnapshot>, CatalogError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CatalogError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let snapshot: CatalogSnapshot =
        serde_json::from_slice(&bytes).map_err(|e| CatalogError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    validate(&snapshot).map_err(|reason| CatalogError::Corrupt {
        path: path.to_path_buf(),
        reason,
    })?;

    Ok(Some(snapshot))
}

/// Atomically replace the snapshot at `path`.
pub fn save(path: &Path, snapshot: &CatalogSnapshot) -> Result<(), CatalogError> {
    let json = serde_json::to_vec_pretty(snapshot)?;
    let temp_path = path.with_extension("json.tmp");

    let io_err = |source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::create(&temp_path).map_err(io_err)?;
    file.write_all(&json).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    fs::rename(&temp_path, path).map_err(io_err)
}

/// Structural checks that must hold for any snapshot the store wrote.
fn validate(snapshot: &CatalogSnapshot) -> Result<(), String> {
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(format!("unsupported snapshot version {}", snapshot.version));
    }

    let fingerprints = snapshot
        .sources
        .iter()
        .map(|s| &s.fingerprint)
        .chain(snapshot.tilesets.iter().map(|t| &t.fingerprint))
        .chain(snapshot.jobs.iter().map(|j| &j.fingerprint));
    for fingerprint in fingerprints {
        if !fingerprint.is_well_formed() {
            return Err(format!("malformed fingerprint {:?}", fingerprint.as_str()));
        }
    }

    let mut paths = HashSet::new();
    for source in &snapshot.sources {
        if !paths.insert(source.path.as_path()) {
            return Err(format!("duplicate source file {}", source.path.display()));
        }
    }

    let mut ids = HashSet::new();
    let mut stale_per_path = HashSet::new();
    for tileset in &snapshot.tilesets {
        if !ids.insert(&tileset.id) {
            return Err(format!("duplicate tileset {}", tileset.id));
        }
        if tileset.id != tileset.fingerprint.tileset_id() {
            return Err(format!("tileset {} does not match its fingerprint", tileset.id));
        }
        let source = snapshot
            .sources
            .iter()
            .find(|s| s.path == tileset.source_path)
            .ok_or_else(|| {
                format!(
                    "tileset {} references unknown source {}",
                    tileset.id,
                    tileset.source_path.display()
                )
            })?;
        match tileset.status {
            TilesetStatus::Ready if source.fingerprint != tileset.fingerprint => {
                return Err(format!(
                    "ready tileset {} does not match the current version of {}",
                    tileset.id,
                    source.path.display()
                ));
            }
            TilesetStatus::Stale if !stale_per_path.insert(tileset.source_path.as_path()) => {
                return Err(format!(
                    "more than one stale tileset for {}",
                    source.path.display()
                ));
            }
            _ => {}
        }
    }

    Ok(())
}
