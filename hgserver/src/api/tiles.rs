//! Tile lookup against published tile packs.
//!
//! Opened pack indexes are cached per tileset. Reads go back to the file
//! each time, so a pack deleted or replaced underneath the cache surfaces as
//! [`ApiError::ArtifactUnavailable`] and never as a wrong payload.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::error::ApiError;
use crate::catalog::{Tileset, TilesetId};
use crate::tilepack::{TileAddress, TilePackError, TilePackReader};

/// Cache of opened tile pack indexes keyed by tileset.
#[derive(Debug, Default)]
pub struct PackCache {
    readers: DashMap<TilesetId, Arc<TilePackReader>>,
}

impl PackCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// Drop readers for tilesets that are no longer listed.
    pub fn retain(&self, live: &HashSet<TilesetId>) {
        self.readers.retain(|id, _| live.contains(id));
    }

    /// Read the tile at `(zoom, x, y)` of `tileset`.
    pub async fn read_tile(
        &self,
        tileset: &Tileset,
        zoom: u32,
        x: u32,
        y: u32,
    ) -> Result<Vec<u8>, ApiError> {
        let resolution = tileset
            .resolution(zoom)
            .ok_or_else(|| ApiError::ZoomOutOfRange {
                id: tileset.id.clone(),
                zoom,
            })?;
        if !resolution.contains(x, y) {
            return Err(ApiError::TileOutOfRange { zoom, x, y });
        }

        let reader = self.reader(tileset).await?;
        let address = TileAddress::new(zoom, x, y);
        let read = {
            let reader = Arc::clone(&reader);
            tokio::task::spawn_blocking(move || reader.read_tile(&address))
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?
        };

        match read {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(ApiError::TileNotFound(format!("{}.{}", tileset.id, address))),
            Err(e) => Err(self.unavailable_or_internal(tileset, e)),
        }
    }

    async fn reader(&self, tileset: &Tileset) -> Result<Arc<TilePackReader>, ApiError> {
        if let Some(reader) = self.readers.get(&tileset.id) {
            if reader.path() == tileset.artifact_path.as_path() {
                return Ok(Arc::clone(&reader));
            }
        }

        let path = tileset.artifact_path.clone();
        let opened = tokio::task::spawn_blocking(move || TilePackReader::open(&path))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        match opened {
            Ok(reader) => {
                let reader = Arc::new(reader);
                debug!(tileset = %tileset.id, tiles = reader.tile_count(), "Opened tile pack");
                self.readers.insert(tileset.id.clone(), Arc::clone(&reader));
                Ok(reader)
            }
            Err(e) => Err(self.unavailable_or_internal(tileset, e)),
        }
    }

    fn unavailable_or_internal(&self, tileset: &Tileset, err: TilePackError) -> ApiError {
        self.readers.remove(&tileset.id);
        if err.is_unavailable() {
            debug!(tileset = %tileset.id, "Tile pack missing");
            ApiError::ArtifactUnavailable(tileset.id.clone())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}
