//! One pass over the watch root.
//!
//! Walks the tree up to a depth limit and reports every regular file with
//! its size and modification time. Skipped:
//!
//! - hidden entries (names starting with `.`), including whole directories
//! - excluded directories, such as the artifact directory
//! - in-progress downloads and temporaries (`*.tmp`, `*.part`, `*.crdownload`)
//! - symlinks whose target resolves outside the watch root
//!
//! Symlinks inside the root are followed; walkdir's loop detection keeps
//! cyclic links from recursing forever.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, trace};
use walkdir::{DirEntry, WalkDir};

/// Suffixes of files that are still being written by another program.
const PARTIAL_SUFFIXES: [&str; 3] = [".tmp", ".part", ".crdownload"];

/// Options for one scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub max_depth: usize,
    /// Directories never descended into.
    pub exclude: Vec<PathBuf>,
}

/// A regular file found during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Files found plus counters for what was skipped.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub files: Vec<ObservedFile>,
    pub skipped_links: usize,
    pub errors: usize,
}

/// Scan `root`.
///
/// Fails only when the root itself cannot be read; errors below the root are
/// counted and skipped so one unreadable directory does not hide the rest.
pub fn scan_tree(root: &Path, options: &ScanOptions) -> io::Result<ScanResult> {
    let root = root.canonicalize()?;
    if !root.is_dir() {
        return Err(io::Error::other(format!(
            "{} is not a directory",
            root.display()
        )));
    }
    // Surface permission problems on the root instead of reporting it empty
    std::fs::read_dir(&root)?;

    let exclude: Vec<PathBuf> = options
        .exclude
        .iter()
        .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()))
        .collect();

    let mut result = ScanResult::default();
    let mut skipped_links = 0usize;

    let walker = WalkDir::new(&root)
        .follow_links(true)
        .max_depth(options.max_depth)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            if is_hidden(entry) || exclude.iter().any(|ex| entry.path() == ex.as_path()) {
                return false;
            }
            if entry.path_is_symlink() && !link_stays_inside(entry.path(), &root) {
                trace!(path = %entry.path().display(), "Skipping symlink leaving the watch root");
                skipped_links += 1;
                return false;
            }
            true
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "Scan error");
                result.errors += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() || is_partial(entry.path()) {
            continue;
        }
        let stat = entry
            .metadata()
            .map_err(io::Error::from)
            .and_then(|m| Ok((m.len(), m.modified()?)));
        match stat {
            Ok((size, modified)) => result.files.push(ObservedFile {
                path: entry.path().to_path_buf(),
                size,
                modified,
            }),
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "Cannot stat file");
                result.errors += 1;
            }
        }
    }

    result.skipped_links = skipped_links;
    Ok(result)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| {
            let name = name.to_lowercase();
            PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
        })
}

fn link_stays_inside(path: &Path, root: &Path) -> bool {
    path.canonicalize()
        .map(|target| target.starts_with(root))
        .unwrap_or(false)
}
