//! Request handlers.

use std::collections::{HashMap, HashSet};

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};

use super::dto::{self, JobView, TilesetMeta, TilesetPage};
use super::error::ApiError;
use super::ApiState;
use crate::catalog::{Tileset, TilesetId};

/// Query string as ordered pairs; HiGlass repeats keys (`d=a&d=b`).
type Params = Vec<(String, String)>;

fn values<'a>(params: &'a Params, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    params
        .iter()
        .filter(move |(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn parse_coord(value: &str, tile_id: &str) -> Result<u32, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::BadTileId(tile_id.to_string()))
}

/// `GET /tilesets`
pub async fn list_tilesets(
    State(state): State<ApiState>,
    Query(params): Query<Params>,
) -> Result<Json<TilesetPage>, ApiError> {
    let datatypes: Vec<&str> = values(&params, "dt").collect();
    let filetypes: Vec<&str> = values(&params, "t").collect();
    let limit = match values(&params, "limit").next() {
        Some(raw) => Some(raw.parse::<usize>().map_err(|_| ApiError::BadQuery {
            name: "limit".into(),
            value: raw.into(),
        })?),
        None => None,
    };

    let tilesets = state.catalog.list_tilesets();
    let live: HashSet<TilesetId> = tilesets.iter().map(|t| t.id.clone()).collect();
    state.packs.retain(&live);

    let matching: Vec<TilesetMeta> = tilesets
        .iter()
        .filter(|t| {
            datatypes.is_empty() || t.kind.datatype().is_some_and(|dt| datatypes.contains(&dt))
        })
        .filter(|t| filetypes.is_empty() || filetypes.contains(&t.filetype.as_str()))
        .map(TilesetMeta::from)
        .collect();

    let count = matching.len();
    let results = match limit {
        Some(limit) => matching.into_iter().take(limit).collect(),
        None => matching,
    };
    Ok(Json(TilesetPage {
        count,
        next: None,
        previous: None,
        results,
    }))
}

/// `GET /tilesets/:id`
pub async fn get_tileset(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<TilesetMeta>, ApiError> {
    let tileset = state.catalog.lookup_tileset(&TilesetId::new(id))?;
    Ok(Json(TilesetMeta::from(&tileset)))
}

/// `GET /tiles/:id/:z/:x/:y`
pub async fn get_tile(
    State(state): State<ApiState>,
    Path((id, z, x, y)): Path<(String, String, String, String)>,
) -> Result<Response, ApiError> {
    let tileset = state.catalog.lookup_tileset(&TilesetId::new(id.as_str()))?;
    // A coordinate that is not a valid index names no tile of this tileset
    let tile_id = format!("{}.{}.{}.{}", id, z, x, y);
    let coord = |value: &str| {
        value
            .parse::<u32>()
            .map_err(|_| ApiError::TileNotFound(tile_id.clone()))
    };
    let (z, x, y) = (coord(z.as_str())?, coord(x.as_str())?, coord(y.as_str())?);

    let payload = state.packs.read_tile(&tileset, z, x, y).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], payload).into_response())
}

/// A parsed HiGlass tile id: `<uuid>.<z>.<x>[.<y>]`.
#[derive(Debug, PartialEq, Eq)]
struct TileRef {
    id: TilesetId,
    z: u32,
    x: u32,
    y: u32,
}

fn parse_tile_id(tile_id: &str) -> Result<TileRef, ApiError> {
    let parts: Vec<&str> = tile_id.split('.').collect();
    let (id, coords) = match parts.as_slice() {
        [id, rest @ ..] if !id.is_empty() && (rest.len() == 2 || rest.len() == 3) => (*id, rest),
        _ => return Err(ApiError::BadTileId(tile_id.to_string())),
    };
    Ok(TileRef {
        id: TilesetId::new(id),
        z: parse_coord(coords[0], tile_id)?,
        x: parse_coord(coords[1], tile_id)?,
        y: match coords.get(2) {
            Some(y) => parse_coord(y, tile_id)?,
            None => 0,
        },
    })
}

/// `GET /tiles?d=<uuid>.<z>.<x>[.<y>]`
///
/// Tiles that fail are reported inline so one bad id does not fail the batch.
pub async fn batch_tiles(
    State(state): State<ApiState>,
    Query(params): Query<Params>,
) -> Json<Map<String, Value>> {
    let mut tilesets: HashMap<TilesetId, Result<Tileset, String>> = HashMap::new();
    let mut out = Map::new();

    for tile_id in values(&params, "d") {
        let entry = match fetch_tile(&state, &mut tilesets, tile_id).await {
            Ok(payload) => serde_json::from_slice::<Value>(&payload).unwrap_or_else(|_| {
                json!({ "error": format!("tile {} is binary; fetch it from /tiles/{}", tile_id, tile_id.replace('.', "/")) })
            }),
            Err(e) => json!({ "error": e.to_string() }),
        };
        out.insert(tile_id.to_string(), entry);
    }
    Json(out)
}

async fn fetch_tile(
    state: &ApiState,
    tilesets: &mut HashMap<TilesetId, Result<Tileset, String>>,
    tile_id: &str,
) -> Result<Vec<u8>, ApiError> {
    let tile = parse_tile_id(tile_id)?;
    let tileset = tilesets
        .entry(tile.id.clone())
        .or_insert_with(|| {
            state
                .catalog
                .lookup_tileset(&tile.id)
                .map_err(|e| e.to_string())
        })
        .clone()
        .map_err(|_| ApiError::UnknownTileset(tile.id.clone()))?;
    state.packs.read_tile(&tileset, tile.z, tile.x, tile.y).await
}

/// `GET /tileset_info?d=<uuid>`
pub async fn tileset_info(
    State(state): State<ApiState>,
    Query(params): Query<Params>,
) -> Json<Map<String, Value>> {
    let mut out = Map::new();
    for id in values(&params, "d") {
        let info = match state.catalog.lookup_tileset(&TilesetId::new(id)) {
            Ok(tileset) => dto::tileset_info(&tileset),
            Err(e) => json!({ "error": ApiError::from(e).to_string() }),
        };
        out.insert(id.to_string(), info);
    }
    Json(out)
}

/// `GET /chrom-sizes?id=<uuid>`
pub async fn chrom_sizes(
    State(state): State<ApiState>,
    Query(params): Query<Params>,
) -> Result<Response, ApiError> {
    let id = values(&params, "id").next().ok_or_else(|| ApiError::BadQuery {
        name: "id".into(),
        value: String::new(),
    })?;
    let tileset = state.catalog.lookup_tileset(&TilesetId::new(id))?;
    let body = chrom_sizes_tsv(&tileset).ok_or_else(|| ApiError::NoChromSizes(tileset.id.clone()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response())
}

/// Render `boundsInfo.chromsizes` (`[[name, length], ...]`) as TSV.
fn chrom_sizes_tsv(tileset: &Tileset) -> Option<String> {
    let entries = tileset.bounds_info.get("chromsizes")?.as_array()?;
    let mut tsv = String::new();
    for entry in entries {
        let name = entry.get(0)?.as_str()?;
        let length = entry.get(1)?.as_u64()?;
        tsv.push_str(&format!("{}\t{}\n", name, length));
    }
    (!tsv.is_empty()).then_some(tsv)
}

/// `GET /jobs`
pub async fn list_jobs(State(state): State<ApiState>) -> Json<Vec<JobView>> {
    Json(state.catalog.list_jobs().iter().map(JobView::from).collect())
}
