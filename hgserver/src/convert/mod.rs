//! Conversion of source files into tilesets.
//!
//! A [`Converter`] turns one source file into a directory of loose tiles
//! plus a manifest describing the tile grid:
//!
//! ```text
//! <output_dir>/
//! ├── tileset_info.json      {"resolutions": [...], <bounds info>}
//! └── tiles/<z>/<x>/<y>      one file per tile
//! ```
//!
//! The worker pool packs that directory into a tile pack and publishes it.
//! [`CommandConverter`] delegates to external tools per file kind; tests
//! plug in their own implementations.

mod command;
mod manifest;

pub use command::CommandConverter;
pub use manifest::{parse_manifest, read_manifest, MANIFEST_FILE_NAME};

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::catalog::{FileKind, Resolution};

/// Boxed future returned by converters.
pub use futures::future::BoxFuture;

/// Directory name, relative to the output directory, holding loose tiles.
pub const TILES_DIR_NAME: &str = "tiles";

/// Input for a single conversion.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub source_path: PathBuf,
    pub kind: FileKind,
    /// Empty directory the converter writes into.
    pub output_dir: PathBuf,
}

impl ConversionRequest {
    pub fn tiles_dir(&self) -> PathBuf {
        self.output_dir.join(TILES_DIR_NAME)
    }
}

/// Description of a converter's output.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutput {
    pub resolutions: Vec<Resolution>,
    pub bounds_info: serde_json::Value,
}

/// Why a conversion failed.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// No converter is configured for this kind. Never retried.
    #[error("no converter configured for {0} files")]
    UnsupportedKind(FileKind),

    /// The conversion tool ran and failed.
    #[error("conversion tool failed: {0}")]
    Tool(String),

    /// The input or the tool's output could not be interpreted.
    #[error("malformed conversion output: {0}")]
    MalformedOutput(String),

    #[error("conversion timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("I/O error during conversion: {0}")]
    Io(#[from] std::io::Error),

    /// The tileset could not be registered in the catalog.
    #[error("failed to publish tileset: {0}")]
    Publish(String),
}

impl ConversionError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConversionError::UnsupportedKind(_))
    }

    /// Short machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            ConversionError::UnsupportedKind(_) => "unsupported_kind",
            ConversionError::Tool(_) => "tool_error",
            ConversionError::MalformedOutput(_) => "malformed_output",
            ConversionError::Timeout(_) => "timeout",
            ConversionError::Io(_) => "io",
            ConversionError::Publish(_) => "publish",
        }
    }
}

/// Converts source files into loose tiles.
pub trait Converter: Send + Sync {
    /// Convert `request.source_path` into `request.output_dir`.
    fn convert<'a>(
        &'a self,
        request: &'a ConversionRequest,
    ) -> BoxFuture<'a, Result<ConversionOutput, ConversionError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unsupported_kind_is_permanent() {
        assert!(!ConversionError::UnsupportedKind(FileKind::Matrix).is_retryable());
        assert!(ConversionError::Tool("exit 1".into()).is_retryable());
        assert!(ConversionError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(ConversionError::MalformedOutput("bad".into()).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ConversionError::Timeout(Duration::from_secs(90)).to_string(),
            "conversion timed out after 90s"
        );
        assert_eq!(
            ConversionError::UnsupportedKind(FileKind::Alignment).to_string(),
            "no converter configured for alignment files"
        );
    }
}
