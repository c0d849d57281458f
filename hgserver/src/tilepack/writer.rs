//! Packs a converter's tile directory into a single `.hgtp` file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use tracing::debug;
use walkdir::WalkDir;

use super::format::{self, IndexEntry, TileAddress, ENTRY_LEN, HEADER_LEN};
use super::TilePackError;
use crate::catalog::Resolution;

/// Summary of a written pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSummary {
    pub tiles: usize,
    pub bytes: u64,
}

/// Builds tile packs from `<tiles_dir>/<z>/<x>/<y>` trees.
pub struct TilePackWriter;

impl TilePackWriter {
    /// Pack every tile under `tiles_dir` into `dest`.
    ///
    /// Each tile must sit at depth three with numeric path components and
    /// fall inside the grid declared for its zoom level. Anything else is
    /// reported as [`TilePackError::Malformed`].
    pub fn pack_directory(
        tiles_dir: &Path,
        resolutions: &[Resolution],
        dest: &Path,
    ) -> Result<PackSummary, TilePackError> {
        let tiles = collect_tiles(tiles_dir, resolutions)?;
        if tiles.is_empty() {
            return Err(TilePackError::Malformed(format!(
                "no tiles found under {}",
                tiles_dir.display()
            )));
        }

        let mut index = Vec::with_capacity(tiles.len());
        let mut offset = (HEADER_LEN + ENTRY_LEN * tiles.len()) as u64;
        for (address, (_, len)) in &tiles {
            let len = u32::try_from(*len).map_err(|_| {
                TilePackError::Malformed(format!("tile {} exceeds 4 GiB", address))
            })?;
            index.push(IndexEntry {
                address: *address,
                offset,
                len,
            });
            offset += u64::from(len);
        }

        let mut head = BytesMut::with_capacity(HEADER_LEN + ENTRY_LEN * index.len());
        format::encode_header(&mut head, index.len() as u64);
        for entry in &index {
            format::encode_entry(&mut head, entry);
        }

        let file = File::create(dest)?;
        let mut out = BufWriter::new(file);
        out.write_all(&head)?;
        for (entry, (path, _)) in index.iter().zip(tiles.values()) {
            let copied = io::copy(&mut File::open(path)?, &mut out)?;
            if copied != u64::from(entry.len) {
                return Err(TilePackError::Malformed(format!(
                    "tile {} changed size while packing",
                    entry.address
                )));
            }
        }
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        debug!(
            dest = %dest.display(),
            tiles = index.len(),
            bytes = offset,
            "Tile pack written"
        );

        Ok(PackSummary {
            tiles: index.len(),
            bytes: offset,
        })
    }
}

fn collect_tiles(
    tiles_dir: &Path,
    resolutions: &[Resolution],
) -> Result<BTreeMap<TileAddress, (PathBuf, u64)>, TilePackError> {
    if !tiles_dir.is_dir() {
        return Err(TilePackError::Malformed(format!(
            "tile directory {} does not exist",
            tiles_dir.display()
        )));
    }

    let mut tiles = BTreeMap::new();
    for entry in WalkDir::new(tiles_dir).min_depth(1).max_depth(4) {
        let entry = entry.map_err(|e| TilePackError::Io(io::Error::other(e.to_string())))?;
        let depth = entry.depth();
        let is_file = entry.file_type().is_file();

        match (depth, is_file) {
            (1 | 2, false) => continue,
            (3, true) => {}
            _ => {
                return Err(TilePackError::Malformed(format!(
                    "unexpected entry {} in tile directory",
                    entry.path().display()
                )))
            }
        }

        let relative = entry
            .path()
            .strip_prefix(tiles_dir)
            .map_err(|e| TilePackError::Malformed(e.to_string()))?;
        let address = parse_address(relative)?;

        let resolution = resolutions
            .iter()
            .find(|r| r.zoom == address.z)
            .ok_or_else(|| {
                TilePackError::Malformed(format!("tile {} has undeclared zoom level", address))
            })?;
        if !resolution.contains(address.x, address.y) {
            return Err(TilePackError::Malformed(format!(
                "tile {} is outside the {}x{} grid",
                address, resolution.grid_width, resolution.grid_height
            )));
        }

        let len = fs::metadata(entry.path())?.len();
        tiles.insert(address, (entry.path().to_path_buf(), len));
    }
    Ok(tiles)
}

fn parse_address(relative: &Path) -> Result<TileAddress, TilePackError> {
    let parts: Vec<u32> = relative
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    TilePackError::Malformed(format!(
                        "non-numeric tile path {}",
                        relative.display()
                    ))
                })
        })
        .collect::<Result<_, _>>()?;

    match parts.as_slice() {
        [z, x, y] => Ok(TileAddress::new(*z, *x, *y)),
        _ => Err(TilePackError::Malformed(format!(
            "tile path {} is not z/x/y",
            relative.display()
        ))),
    }
}
