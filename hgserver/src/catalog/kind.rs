//! File kind classification for genomic data files.
//!
//! Classification is extension-first: a trailing `.gz` is stripped and the
//! remaining extension looked up in a fixed table. When the extension says
//! nothing, the first bytes of the file are sniffed for well-known binary
//! signatures (HDF5 containers, `.hic` headers and BBI files). BAM files are
//! BGZF-compressed and recognised by extension only.
//!
//! Every file kind except [`FileKind::Unknown`] maps to a HiGlass datatype and
//! can be converted into a tileset.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of leading bytes read when sniffing a file.
pub const SNIFF_LEN: usize = 8;

const HDF5_MAGIC: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];
const HIC_MAGIC: [u8; 4] = *b"HIC\0";
const BIGWIG_MAGIC: u32 = 0x888F_FC26;
const BIGBED_MAGIC: u32 = 0x8789_F2EB;

/// The closed set of file kinds the service knows how to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    /// Contact matrices (cooler, mcool, hic).
    Matrix,
    /// Read alignments and pair files.
    Alignment,
    /// Quantitative signal along the genome (bigWig, bedGraph).
    SignalTrack,
    /// Interval annotations (BED, bigBed, GFF).
    AnnotationTrack,
    /// Anything not recognised. Recorded, never converted.
    Unknown,
}

impl FileKind {
    /// All convertible kinds, in configuration order.
    pub const CONVERTIBLE: [FileKind; 4] = [
        FileKind::Matrix,
        FileKind::Alignment,
        FileKind::SignalTrack,
        FileKind::AnnotationTrack,
    ];

    /// Stable lowercase name used in the API and the config file.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Matrix => "matrix",
            FileKind::Alignment => "alignment",
            FileKind::SignalTrack => "signal-track",
            FileKind::AnnotationTrack => "annotation-track",
            FileKind::Unknown => "unknown",
        }
    }

    /// HiGlass datatype served for tilesets of this kind.
    pub fn datatype(&self) -> Option<&'static str> {
        match self {
            FileKind::Matrix => Some("matrix"),
            FileKind::Alignment => Some("reads"),
            FileKind::SignalTrack => Some("vector"),
            FileKind::AnnotationTrack => Some("bedlike"),
            FileKind::Unknown => None,
        }
    }

    /// Whether files of this kind are eligible for conversion.
    pub fn is_convertible(&self) -> bool {
        !matches!(self, FileKind::Unknown)
    }

    /// Classify by file extension alone.
    pub fn from_path(path: &Path) -> FileKind {
        match data_extension(path).as_deref() {
            Some("cool" | "mcool" | "hic" | "matrix") => FileKind::Matrix,
            Some("bam" | "sam" | "cram" | "pairs" | "pairsam") => FileKind::Alignment,
            Some("bw" | "bigwig" | "bedgraph" | "bg") => FileKind::SignalTrack,
            Some("bed" | "bb" | "bigbed" | "beddb" | "gff" | "gtf") => {
                FileKind::AnnotationTrack
            }
            _ => FileKind::Unknown,
        }
    }

    /// Classify from the leading bytes of a file.
    pub fn from_magic(head: &[u8]) -> FileKind {
        if head.len() >= HDF5_MAGIC.len() && head[..HDF5_MAGIC.len()] == HDF5_MAGIC {
            return FileKind::Matrix;
        }
        if head.len() < 4 {
            return FileKind::Unknown;
        }
        let prefix = [head[0], head[1], head[2], head[3]];
        if prefix == HIC_MAGIC {
            return FileKind::Matrix;
        }
        // BBI files may be written in either byte order
        let le = u32::from_le_bytes(prefix);
        let be = u32::from_be_bytes(prefix);
        if le == BIGWIG_MAGIC || be == BIGWIG_MAGIC {
            return FileKind::SignalTrack;
        }
        if le == BIGBED_MAGIC || be == BIGBED_MAGIC {
            return FileKind::AnnotationTrack;
        }
        FileKind::Unknown
    }

    /// Classify a file on disk, falling back to sniffing when the extension
    /// is not recognised.
    pub fn detect(path: &Path) -> io::Result<FileKind> {
        let kind = FileKind::from_path(path);
        if kind.is_convertible() {
            return Ok(kind);
        }

        let mut head = Vec::with_capacity(SNIFF_LEN);
        File::open(path)?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)?;
        Ok(FileKind::from_magic(&head))
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "matrix" => Ok(FileKind::Matrix),
            "alignment" => Ok(FileKind::Alignment),
            "signal-track" => Ok(FileKind::SignalTrack),
            "annotation-track" => Ok(FileKind::AnnotationTrack),
            "unknown" => Ok(FileKind::Unknown),
            other => Err(format!("unknown file kind: {}", other)),
        }
    }
}

/// HiGlass filetype label for a source file.
///
/// Derived from the extension; falls back to the kind's default container
/// when the file was recognised by sniffing.
pub fn filetype(path: &Path, kind: FileKind) -> String {
    let label = match data_extension(path).as_deref() {
        Some("cool" | "mcool") => "cooler",
        Some("hic") => "hic",
        Some("bw" | "bigwig") => "bigwig",
        Some("bb" | "bigbed") => "bigbed",
        Some("bedgraph" | "bg") => "bedgraph",
        Some("beddb") => "beddb",
        Some("bed") => "bed",
        Some("gff" | "gtf") => "gff",
        Some("bam") => "bam",
        Some("sam") => "sam",
        Some("cram") => "cram",
        Some("pairs" | "pairsam") => "pairs",
        Some("matrix") => "matrix",
        _ => match kind {
            FileKind::Matrix => "cooler",
            FileKind::Alignment => "bam",
            FileKind::SignalTrack => "bigwig",
            FileKind::AnnotationTrack => "bigbed",
            FileKind::Unknown => "unknown",
        },
    };
    label.to_string()
}

/// Lowercased extension with a trailing `.gz` stripped.
fn data_extension(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?.to_lowercase();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(ext.to_string())
}
