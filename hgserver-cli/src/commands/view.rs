//! View command - print a HiGlass view config for the served tilesets.
//!
//! The front end is not bundled; the printed JSON can be loaded into any
//! HiGlass viewer that can reach the tile API.

use std::collections::HashSet;
use std::path::PathBuf;

use serde_json::{json, Value};

use hgserver::api::API_PREFIX;
use hgserver::catalog::{FileKind, Tileset};
use hgserver::config::ConfigFile;

use super::open_catalog;
use crate::error::CliError;

/// Run the view command.
pub fn run(api_url: Option<String>, artifact_dir: Option<PathBuf>) -> Result<(), CliError> {
    let api_url = match api_url {
        Some(url) => url,
        None => {
            let config = ConfigFile::load()?;
            format!("http://{}:{}{}", config.api.host, config.api.port, API_PREFIX)
        }
    };

    let catalog = open_catalog(artifact_dir)?;
    let tilesets = catalog.list_tilesets();
    if tilesets.is_empty() {
        eprintln!("No tilesets available yet.");
    }

    let config = view_config(&tilesets, api_url.trim_end_matches('/'));
    let text =
        serde_json::to_string_pretty(&config).map_err(|e| CliError::Config(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

/// HiGlass track type used to display a kind, and the view position it goes in.
fn track_type(kind: FileKind) -> Option<(&'static str, &'static str)> {
    match kind {
        FileKind::Matrix => Some(("heatmap", "center")),
        FileKind::SignalTrack => Some(("horizontal-bar", "top")),
        FileKind::AnnotationTrack => Some(("bedlike", "top")),
        FileKind::Alignment => Some(("pileup", "top")),
        FileKind::Unknown => None,
    }
}

/// Build a single-view config with one track per source file.
///
/// A stale tileset is only shown when its source has no ready replacement.
fn view_config(tilesets: &[Tileset], api_url: &str) -> Value {
    let ready_sources: HashSet<&PathBuf> = tilesets
        .iter()
        .filter(|t| !t.is_stale())
        .map(|t| &t.source_path)
        .collect();

    let mut top = Vec::new();
    let mut center = Vec::new();
    for tileset in tilesets {
        if tileset.is_stale() && ready_sources.contains(&tileset.source_path) {
            continue;
        }
        let Some((track, position)) = track_type(tileset.kind) else {
            continue;
        };
        let entry = json!({
            "uid": tileset.id.as_str(),
            "type": track,
            "server": api_url,
            "tilesetUid": tileset.id.as_str(),
            "options": { "name": tileset.name() },
        });
        match position {
            "center" => center.push(entry),
            _ => top.push(entry),
        }
    }

    json!({
        "editable": true,
        "trackSourceServers": [api_url],
        "views": [{
            "uid": "main",
            "tracks": {
                "top": top,
                "center": center,
                "left": [],
                "right": [],
                "bottom": [],
            },
            "layout": { "w": 12, "h": 12, "x": 0, "y": 0 },
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hgserver::catalog::{Resolution, SourceFile, TilesetStatus};
    use std::time::{Duration, UNIX_EPOCH};

    fn tileset(path: &str, mtime: u64, kind: FileKind) -> Tileset {
        let source = SourceFile::new(
            path,
            10,
            UNIX_EPOCH + Duration::from_secs(mtime),
            kind,
        );
        Tileset::ready(
            &source,
            vec![Resolution::new(0, 1, 1)],
            json!({}),
            PathBuf::from("/artifacts/x.hgtp"),
        )
    }

    #[test]
    fn test_tracks_are_placed_by_kind() {
        let matrix = tileset("/d/a.mcool", 1, FileKind::Matrix);
        let signal = tileset("/d/b.bw", 1, FileKind::SignalTrack);

        let config = view_config(&[matrix.clone(), signal.clone()], "http://h:1/api/v1");
        let tracks = &config["views"][0]["tracks"];

        assert_eq!(tracks["center"][0]["tilesetUid"], matrix.id.as_str());
        assert_eq!(tracks["center"][0]["type"], "heatmap");
        assert_eq!(tracks["top"][0]["tilesetUid"], signal.id.as_str());
        assert_eq!(tracks["top"][0]["server"], "http://h:1/api/v1");
        assert_eq!(config["trackSourceServers"][0], "http://h:1/api/v1");
    }

    #[test]
    fn test_stale_tileset_hidden_once_replaced() {
        let mut old = tileset("/d/b.bw", 1, FileKind::SignalTrack);
        old.status = TilesetStatus::Stale;
        let new = tileset("/d/b.bw", 2, FileKind::SignalTrack);

        let config = view_config(&[old.clone()], "http://h");
        assert_eq!(config["views"][0]["tracks"]["top"][0]["tilesetUid"], old.id.as_str());

        let config = view_config(&[old, new.clone()], "http://h");
        let top = config["views"][0]["tracks"]["top"].as_array().unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0]["tilesetUid"], new.id.as_str());
    }
}
