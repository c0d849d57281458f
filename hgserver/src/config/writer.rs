//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use std::path::Path;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let root = config
        .watch
        .root
        .as_ref()
        .map(|p| path_to_string(p))
        .unwrap_or_default();
    let matrix = config.converter.matrix.as_deref().unwrap_or("");
    let alignment = config.converter.alignment.as_deref().unwrap_or("");
    let signal_track = config.converter.signal_track.as_deref().unwrap_or("");
    let annotation_track = config.converter.annotation_track.as_deref().unwrap_or("");

    format!(
        r#"[watch]
; Directory scanned for genomic data files. Can be overridden on the command line.
root = {}
; Seconds between scans of the watch root (default: 5)
poll_interval_secs = {}
; Maximum directory depth below the root (default: 16)
max_depth = {}
; Seconds a file may be missing before its tilesets are deleted (default: 30)
removal_grace_secs = {}

[workers]
; Number of concurrent conversions (default: 2)
num_worker = {}
; Wall-clock limit for a single conversion in seconds (default: 1800)
conversion_timeout_secs = {}

[retry]
; Attempts before a conversion is marked as failed (default: 3)
max_attempts = {}
; Base backoff delay in milliseconds, doubled after each failure (default: 2000)
base_delay_ms = {}
; Upper bound for a single backoff delay in seconds (default: 300)
max_delay_secs = {}

[api]
; Address the tile API listens on
host = {}
port = {}

[storage]
; Tile packs and the catalog snapshot (catalog.json) are stored here
artifact_dir = {}

[converter]
; Command templates per file kind. Placeholders:
;   {{input}}  - source file path
;   {{output}} - empty output directory; write tiles to {{output}}/tiles/<z>/<x>/<y>
;                and the grid description to {{output}}/tileset_info.json
;   {{kind}}   - matrix, alignment, signal-track or annotation-track
; Kinds without a template are recorded but never converted.
matrix = {}
alignment = {}
signal_track = {}
annotation_track = {}

[logging]
; Log file location (truncated on every start)
file = {}
"#,
        root,
        config.watch.poll_interval_secs,
        config.watch.max_depth,
        config.watch.removal_grace_secs,
        config.workers.num_worker,
        config.workers.conversion_timeout_secs,
        config.retry.max_attempts,
        config.retry.base_delay_ms,
        config.retry.max_delay_secs,
        config.api.host,
        config.api.port,
        path_to_string(&config.storage.artifact_dir),
        matrix,
        alignment,
        signal_track,
        annotation_track,
        path_to_string(&config.logging.file),
    )
}

/// Render a path, abbreviating the home directory as `~`.
pub(super) fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
