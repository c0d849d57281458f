//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`config`] - Configuration management (get, set, list, path)
//! - [`serve`] - Main command (watch, convert and serve)
//! - [`status`] - Catalog inspection
//! - [`view`] - HiGlass view config generation

pub mod config;
pub mod serve;
pub mod status;
pub mod view;

use std::path::{Path, PathBuf};

use hgserver::catalog::{CatalogStore, CATALOG_FILE_NAME};
use hgserver::config::ConfigFile;

use crate::error::CliError;

/// Open the persisted catalog for inspection.
///
/// `artifact_dir` overrides `storage.artifact_dir` from the config file.
pub(crate) fn open_catalog(artifact_dir: Option<PathBuf>) -> Result<CatalogStore, CliError> {
    let dir = match artifact_dir {
        Some(dir) => dir,
        None => ConfigFile::load()?.storage.artifact_dir,
    };
    let path = dir.join(CATALOG_FILE_NAME);
    if !path.exists() {
        return Err(no_catalog(&dir));
    }
    Ok(CatalogStore::read_only(&path)?)
}

fn no_catalog(dir: &Path) -> CliError {
    CliError::Config(format!(
        "No catalog in {}. Run 'hgserver serve <root>' first or pass --artifact-dir.",
        dir.display()
    ))
}
