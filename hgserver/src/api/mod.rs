//! Read-only HTTP API over the catalog and published tile packs.
//!
//! Routes are mounted at the root and again under `/api/v1`, matching the
//! paths HiGlass viewers request:
//!
//! ```text
//! GET /tilesets                 listing, filters: dt, t, limit
//! GET /tilesets/:id             one tileset
//! GET /tiles/:id/:z/:x/:y       raw tile payload
//! GET /tiles?d=<id>.<z>.<x>.<y> batched JSON tiles
//! GET /tileset_info?d=<id>      bounds and resolutions
//! GET /chrom-sizes?id=<id>      chromosome sizes as TSV
//! GET /jobs                     conversion job records
//! ```
//!
//! Nothing here mutates the catalog.

mod dto;
mod error;
mod handlers;
mod tiles;

pub use dto::{JobView, TilesetMeta, TilesetPage};
pub use error::ApiError;
pub use tiles::PackCache;

use std::io;
use std::sync::Arc;

use axum::http::{header, HeaderValue};
use axum::response::Response;
use axum::routing::get;
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::catalog::CatalogStore;

/// Path prefix for the versioned API.
pub const API_PREFIX: &str = "/api/v1";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub catalog: Arc<CatalogStore>,
    pub packs: Arc<PackCache>,
}

impl ApiState {
    pub fn new(catalog: Arc<CatalogStore>) -> Self {
        Self {
            catalog,
            packs: Arc::new(PackCache::new()),
        }
    }
}

fn routes() -> Router<ApiState> {
    Router::new()
        .route("/tilesets", get(handlers::list_tilesets))
        .route("/tilesets/", get(handlers::list_tilesets))
        .route("/tilesets/:id", get(handlers::get_tileset))
        .route("/tiles", get(handlers::batch_tiles))
        .route("/tiles/", get(handlers::batch_tiles))
        .route("/tiles/:id/:z/:x/:y", get(handlers::get_tile))
        .route("/tileset_info", get(handlers::tileset_info))
        .route("/tileset_info/", get(handlers::tileset_info))
        .route("/chrom-sizes", get(handlers::chrom_sizes))
        .route("/chrom-sizes/", get(handlers::chrom_sizes))
        .route("/jobs", get(handlers::list_jobs))
}

/// Build the application router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .merge(routes())
        .nest(API_PREFIX, routes())
        .layer(middleware::map_response(allow_any_origin))
        .with_state(state)
}

/// Viewers are served from other origins.
async fn allow_any_origin(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

/// Serve the API on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    shutdown: CancellationToken,
) -> io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "API server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("API server stopped");
    Ok(())
}
