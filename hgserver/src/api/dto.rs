//! JSON shapes returned by the API.
//!
//! Field names follow the HiGlass server so existing viewers can consume
//! them unchanged.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::{JobRecord, Resolution, Tileset};

/// One entry of the tileset listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TilesetMeta {
    pub uuid: String,
    pub id: String,
    pub name: String,
    pub kind: String,
    pub datatype: Option<&'static str>,
    pub filetype: String,
    pub resolutions: Vec<Resolution>,
    pub bounds_info: serde_json::Value,
    pub status: &'static str,
    pub stale: bool,
}

impl From<&Tileset> for TilesetMeta {
    fn from(tileset: &Tileset) -> Self {
        Self {
            uuid: tileset.id.to_string(),
            id: tileset.id.to_string(),
            name: tileset.name(),
            kind: tileset.kind.as_str().to_string(),
            datatype: tileset.kind.datatype(),
            filetype: tileset.filetype.clone(),
            resolutions: tileset.resolutions.clone(),
            bounds_info: tileset.bounds_info.clone(),
            status: tileset.status.as_str(),
            stale: tileset.is_stale(),
        }
    }
}

/// Paginated listing envelope used by `/tilesets`.
#[derive(Debug, Serialize)]
pub struct TilesetPage {
    pub count: usize,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<TilesetMeta>,
}

/// `tileset_info` entry: the converter's bounds plus descriptive fields.
pub fn tileset_info(tileset: &Tileset) -> serde_json::Value {
    let mut info = match &tileset.bounds_info {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    info.insert("name".into(), tileset.name().into());
    info.insert("filetype".into(), tileset.filetype.clone().into());
    if let Some(datatype) = tileset.kind.datatype() {
        info.insert("datatype".into(), datatype.into());
    }
    info.entry("max_zoom")
        .or_insert_with(|| tileset.max_zoom().into());
    info.insert("status".into(), tileset.status.as_str().into());
    serde_json::Value::Object(info)
}

/// Operator view of a conversion job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub fingerprint: String,
    pub tileset: String,
    pub path: String,
    pub kind: &'static str,
    pub state: &'static str,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobView {
    fn from(job: &JobRecord) -> Self {
        Self {
            fingerprint: job.fingerprint.to_string(),
            tileset: job.fingerprint.tileset_id().to_string(),
            path: job.source_path.display().to_string(),
            kind: job.kind.as_str(),
            state: job.state.as_str(),
            attempts: job.attempts,
            last_error: job.last_error.clone(),
            updated_at: job.updated_at,
        }
    }
}
