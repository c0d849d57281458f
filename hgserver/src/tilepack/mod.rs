//! Tile packs: the on-disk artifact of a converted tileset.
//!
//! A converter writes loose tiles to `<output>/tiles/<z>/<x>/<y>`. The
//! worker packs them into one indexed file so a tileset is published by a
//! single atomic rename and served with one open file per tileset.

mod format;
mod reader;
mod writer;

pub use format::TileAddress;
pub use reader::TilePackReader;
pub use writer::{PackSummary, TilePackWriter};

use thiserror::Error;

/// File extension of tile packs.
pub const TILE_PACK_EXTENSION: &str = "hgtp";

/// Errors reading or writing tile packs.
#[derive(Debug, Error)]
pub enum TilePackError {
    #[error("tile pack I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a tile pack (bad magic)")]
    BadMagic,

    #[error("unsupported tile pack version {0}")]
    UnsupportedVersion(u16),

    #[error("tile pack truncated in {0}")]
    Truncated(String),

    #[error("malformed tile output: {0}")]
    Malformed(String),
}

impl TilePackError {
    /// The pack file is not where it should be.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, TilePackError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}
