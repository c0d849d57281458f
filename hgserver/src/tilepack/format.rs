//! Binary layout of `.hgtp` tile packs.
//!
//! ```text
//! offset  size  field
//! 0       4     magic "HGTP"
//! 4       2     version (u16 LE)
//! 6       2     reserved
//! 8       8     entry count (u64 LE)
//! 16      28*n  index entries, sorted by (z, x, y)
//!               z u32 | x u32 | y u32 | offset u64 | length u32
//! ...           tile payloads
//! ```
//!
//! Offsets are absolute from the start of the file.

use bytes::{Buf, BufMut, BytesMut};

use super::TilePackError;

pub const MAGIC: [u8; 4] = *b"HGTP";
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 16;
pub const ENTRY_LEN: usize = 28;

/// Address of a tile inside a tileset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileAddress {
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

impl TileAddress {
    pub fn new(z: u32, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }
}

impl std::fmt::Display for TileAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.z, self.x, self.y)
    }
}

/// One index entry: where a tile's payload lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub address: TileAddress,
    pub offset: u64,
    pub len: u32,
}

pub fn encode_header(buf: &mut BytesMut, count: u64) {
    buf.put_slice(&MAGIC);
    buf.put_u16_le(VERSION);
    buf.put_u16_le(0);
    buf.put_u64_le(count);
}

pub fn encode_entry(buf: &mut BytesMut, entry: &IndexEntry) {
    buf.put_u32_le(entry.address.z);
    buf.put_u32_le(entry.address.x);
    buf.put_u32_le(entry.address.y);
    buf.put_u64_le(entry.offset);
    buf.put_u32_le(entry.len);
}

/// Decode the header, returning the entry count.
pub fn decode_header(mut buf: &[u8]) -> Result<u64, TilePackError> {
    if buf.len() < HEADER_LEN {
        return Err(TilePackError::Truncated("header".to_string()));
    }
    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if magic != MAGIC {
        return Err(TilePackError::BadMagic);
    }
    let version = buf.get_u16_le();
    if version != VERSION {
        return Err(TilePackError::UnsupportedVersion(version));
    }
    let _reserved = buf.get_u16_le();
    Ok(buf.get_u64_le())
}

pub fn decode_entry(mut buf: &[u8]) -> IndexEntry {
    let z = buf.get_u32_le();
    let x = buf.get_u32_le();
    let y = buf.get_u32_le();
    let offset = buf.get_u64_le();
    let len = buf.get_u32_le();
    IndexEntry {
        address: TileAddress::new(z, x, y),
        offset,
        len,
    }
}
