//! Status command - show what the catalog knows.

use std::path::PathBuf;

use hgserver::catalog::{CatalogStore, JobState};

use super::open_catalog;
use crate::error::CliError;

/// Run the status command.
pub fn run(artifact_dir: Option<PathBuf>) -> Result<(), CliError> {
    let catalog = open_catalog(artifact_dir)?;
    print_status(&catalog);
    Ok(())
}

fn print_status(catalog: &CatalogStore) {
    let sources = catalog.get_source_files();
    let tilesets = catalog.list_tilesets();
    let jobs = catalog.list_jobs();

    println!("Source Files ({})", sources.len());
    println!("============");
    for source in &sources {
        let missing = if source.missing_since.is_some() {
            "  (missing)"
        } else {
            ""
        };
        println!(
            "  {}  {:<16}  {}{}",
            source.fingerprint.short(),
            source.kind.as_str(),
            source.path.display(),
            missing
        );
    }
    println!();

    println!("Tilesets ({})", tilesets.len());
    println!("========");
    for tileset in &tilesets {
        println!(
            "  {}  {:<6}  z0-{:<3}  {}",
            tileset.id,
            tileset.status.as_str(),
            tileset.max_zoom(),
            tileset.name()
        );
    }
    println!();

    println!("Jobs ({})", jobs.len());
    println!("====");
    for job in &jobs {
        println!(
            "  {}  {:<8}  attempts={}  {}",
            job.fingerprint.short(),
            job.state.as_str(),
            job.attempts,
            job.source_path.display()
        );
        if let Some(err) = &job.last_error {
            println!("      last error: {}", err);
        }
    }

    let failed = jobs.iter().filter(|j| j.state == JobState::Error).count();
    if failed > 0 {
        println!();
        println!(
            "{} file(s) failed permanently; they are retried when the file changes.",
            failed
        );
    }
}
