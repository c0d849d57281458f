//! Random access to tiles stored in a `.hgtp` pack.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::format::{self, TileAddress, ENTRY_LEN, HEADER_LEN};
use super::TilePackError;

#[derive(Debug, Clone, Copy)]
struct Extent {
    offset: u64,
    len: u32,
}

/// Parsed index of a tile pack.
///
/// The index is read once at open time. Payloads are read on demand, so a
/// reader stays valid only while its file is in place.
#[derive(Debug)]
pub struct TilePackReader {
    path: PathBuf,
    index: BTreeMap<TileAddress, Extent>,
}

impl TilePackReader {
    /// Open a pack and load its index.
    pub fn open(path: &Path) -> Result<Self, TilePackError> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header)
            .map_err(|_| TilePackError::Truncated("header".to_string()))?;
        let count = format::decode_header(&header)?;

        let index_len = count
            .checked_mul(ENTRY_LEN as u64)
            .filter(|len| HEADER_LEN as u64 + len <= file_len)
            .ok_or_else(|| TilePackError::Truncated("index".to_string()))?;
        let mut raw = vec![0u8; index_len as usize];
        file.read_exact(&mut raw)
            .map_err(|_| TilePackError::Truncated("index".to_string()))?;

        let mut index = BTreeMap::new();
        for chunk in raw.chunks_exact(ENTRY_LEN) {
            let entry = format::decode_entry(chunk);
            let end = entry.offset.saturating_add(u64::from(entry.len));
            if end > file_len {
                return Err(TilePackError::Truncated(format!("tile {}", entry.address)));
            }
            index.insert(
                entry.address,
                Extent {
                    offset: entry.offset,
                    len: entry.len,
                },
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tile_count(&self) -> usize {
        self.index.len()
    }

    pub fn contains(&self, address: &TileAddress) -> bool {
        self.index.contains_key(address)
    }

    /// Read one tile's payload. `Ok(None)` if the pack has no such tile.
    pub fn read_tile(&self, address: &TileAddress) -> Result<Option<Vec<u8>>, TilePackError> {
        let Some(extent) = self.index.get(address) else {
            return Ok(None);
        };

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(extent.offset))?;
        let mut payload = vec![0u8; extent.len as usize];
        file.read_exact(&mut payload)?;
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Resolution;
    use crate::tilepack::TilePackWriter;
    use std::fs;
    use tempfile::TempDir;

    fn build_pack(dir: &Path) -> PathBuf {
        let tiles = dir.join("tiles");
        for (z, x, y, body) in [(0, 0, 0, "a"), (1, 0, 0, "bb"), (1, 1, 1, "ccc")] {
            let d = tiles.join(format!("{}/{}", z, x));
            fs::create_dir_all(&d).unwrap();
            fs::write(d.join(y.to_string()), body).unwrap();
        }
        let dest = dir.join("pack.hgtp");
        TilePackWriter::pack_directory(
            &tiles,
            &[Resolution::new(0, 1, 1), Resolution::new(1, 2, 2)],
            &dest,
        )
        .unwrap();
        dest
    }

    #[test]
    fn test_reads_every_tile() {
        let temp = TempDir::new().unwrap();
        let reader = TilePackReader::open(&build_pack(temp.path())).unwrap();

        assert_eq!(reader.tile_count(), 3);
        assert_eq!(reader.read_tile(&TileAddress::new(0, 0, 0)).unwrap().unwrap(), b"a");
        assert_eq!(reader.read_tile(&TileAddress::new(1, 1, 1)).unwrap().unwrap(), b"ccc");
        assert!(reader.read_tile(&TileAddress::new(1, 0, 1)).unwrap().is_none());
    }

    #[test]
    fn test_truncated_pack_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = build_pack(temp.path());
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        assert!(matches!(
            TilePackReader::open(&path),
            Err(TilePackError::Truncated(_))
        ));
    }

    #[test]
    fn test_removed_pack_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let path = build_pack(temp.path());
        let reader = TilePackReader::open(&path).unwrap();
        fs::remove_file(&path).unwrap();

        let err = reader.read_tile(&TileAddress::new(0, 0, 0)).unwrap_err();
        assert!(err.is_unavailable());
        assert!(TilePackReader::open(&path).unwrap_err().is_unavailable());
    }
}
