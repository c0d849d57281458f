//! Content fingerprints and tileset identifiers.
//!
//! A fingerprint is the hex SHA-256 of `path \0 size \0 mtime_nanos`. It
//! changes whenever the file is rewritten in place, so it doubles as the
//! change-detection key for the watcher and as the dedup key for conversion
//! jobs. The tileset identifier is a prefix of the fingerprint, which makes
//! it stable across restarts.

use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of a fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 64;

/// Length of a tileset identifier in hex characters.
pub const TILESET_ID_LEN: usize = 32;

/// Identity of one version of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint for a file version.
    pub fn compute(path: &Path, size: u64, modified: SystemTime) -> Self {
        let nanos = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        let mut hasher = Sha256::new();
        hasher.update(path.as_os_str().as_encoded_bytes());
        hasher.update([0u8]);
        hasher.update(size.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(nanos.to_string().as_bytes());

        let digest = hasher.finalize();
        let hex = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Self(hex)
    }

    /// Wrap an existing fingerprint string.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a lowercase hex SHA-256, as produced by
    /// [`Fingerprint::compute`].
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == FINGERPRINT_LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    /// The tileset identifier produced by converting this file version.
    pub fn tileset_id(&self) -> TilesetId {
        TilesetId(self.prefix(TILESET_ID_LEN).to_string())
    }

    /// Short form for log output.
    pub fn short(&self) -> &str {
        self.prefix(12)
    }

    fn prefix(&self, len: usize) -> &str {
        self.0.get(..len).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Public, stable identifier of a tileset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TilesetId(String);

impl TilesetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the packed artifact for this tileset.
    pub fn artifact_file_name(&self) -> String {
        format!("{}.hgtp", self.0)
    }
}

impl fmt::Display for TilesetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TilesetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
