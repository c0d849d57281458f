//! Service error types.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::catalog::CatalogError;

/// Errors that stop the service from starting.
#[derive(Debug)]
pub enum ServiceError {
    /// Invalid configuration
    ConfigError(String),
    /// Artifact directory cannot be created or written
    ArtifactDir { path: PathBuf, source: io::Error },
    /// Watch root is missing, not a directory or unreadable
    WatchRoot { path: PathBuf, reason: String },
    /// Catalog snapshot is unusable
    Catalog(CatalogError),
    /// API listener could not be bound
    Bind { addr: String, source: io::Error },
    /// Other I/O error during startup
    IoError(io::Error),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::ArtifactDir { path, source } => {
                write!(
                    f,
                    "Artifact directory {} is not writable: {}",
                    path.display(),
                    source
                )
            }
            Self::WatchRoot { path, reason } => {
                write!(f, "Cannot watch {}: {}", path.display(), reason)
            }
            Self::Catalog(e) => write!(f, "Catalog error: {}", e),
            Self::Bind { addr, source } => write!(f, "Cannot listen on {}: {}", addr, source),
            Self::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ArtifactDir { source, .. } => Some(source),
            Self::Catalog(e) => Some(e),
            Self::Bind { source, .. } => Some(source),
            Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CatalogError> for ServiceError {
    fn from(e: CatalogError) -> Self {
        Self::Catalog(e)
    }
}

impl From<io::Error> for ServiceError {
    fn from(e: io::Error) -> Self {
        Self::IoError(e)
    }
}
