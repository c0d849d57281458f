//! API error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::catalog::{CatalogError, TilesetId};

/// Errors returned to API clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No such tileset with uuid: {0}")]
    UnknownTileset(TilesetId),

    #[error("zoom level {zoom} is out of range for tileset {id}")]
    ZoomOutOfRange { id: TilesetId, zoom: u32 },

    #[error("tile {x},{y} is outside zoom level {zoom}")]
    TileOutOfRange { zoom: u32, x: u32, y: u32 },

    #[error("tile {0} not found")]
    TileNotFound(String),

    #[error("tileset {0} has no chromosome sizes")]
    NoChromSizes(TilesetId),

    #[error("invalid tile id: {0}")]
    BadTileId(String),

    #[error("invalid query parameter {name}: {value}")]
    BadQuery { name: String, value: String },

    /// The artifact is missing or being replaced. Clients should retry.
    #[error("tileset {0} is temporarily unavailable")]
    ArtifactUnavailable(TilesetId),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::UnknownTileset(_) => StatusCode::NOT_FOUND,
            ApiError::ZoomOutOfRange { .. } => StatusCode::NOT_FOUND,
            ApiError::TileOutOfRange { .. } => StatusCode::NOT_FOUND,
            ApiError::TileNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NoChromSizes(_) => StatusCode::NOT_FOUND,
            ApiError::BadTileId(_) => StatusCode::BAD_REQUEST,
            ApiError::BadQuery { .. } => StatusCode::BAD_REQUEST,
            ApiError::ArtifactUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::TilesetNotFound(id) => ApiError::UnknownTileset(id),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "API request failed");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let id = TilesetId::new("abc");
        assert_eq!(
            ApiError::UnknownTileset(id.clone()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::ArtifactUnavailable(id).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::BadTileId("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_catalog_not_found_maps_to_unknown_tileset() {
        let err: ApiError = CatalogError::TilesetNotFound(TilesetId::new("abc")).into();
        assert_eq!(err.to_string(), "No such tileset with uuid: abc");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
