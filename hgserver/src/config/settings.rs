//! Configuration settings structs.
//!
//! Each struct maps to one INI section in `config.ini`.

use std::path::PathBuf;

use crate::catalog::FileKind;

/// Top-level configuration loaded from `~/.hgserver/config.ini`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub watch: WatchSettings,
    pub workers: WorkerSettings,
    pub retry: RetrySettings,
    pub api: ApiSettings,
    pub storage: StorageSettings,
    pub converter: ConverterSettings,
    pub logging: LoggingSettings,
}

/// `[watch]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchSettings {
    /// Directory to watch. May also be given on the command line.
    pub root: Option<PathBuf>,
    pub poll_interval_secs: u64,
    pub max_depth: usize,
    /// How long a file may be missing before its tilesets are removed.
    pub removal_grace_secs: u64,
}

/// `[workers]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub num_worker: usize,
    pub conversion_timeout_secs: u64,
}

/// `[retry]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_secs: u64,
}

/// `[api]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiSettings {
    pub host: String,
    pub port: u16,
}

/// `[storage]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings {
    /// Where tile packs and the catalog snapshot live.
    pub artifact_dir: PathBuf,
}

/// `[converter]` section: one command template per file kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConverterSettings {
    pub matrix: Option<String>,
    pub alignment: Option<String>,
    pub signal_track: Option<String>,
    pub annotation_track: Option<String>,
}

impl ConverterSettings {
    /// Template configured for a kind.
    pub fn template(&self, kind: FileKind) -> Option<&str> {
        match kind {
            FileKind::Matrix => self.matrix.as_deref(),
            FileKind::Alignment => self.alignment.as_deref(),
            FileKind::SignalTrack => self.signal_track.as_deref(),
            FileKind::AnnotationTrack => self.annotation_track.as_deref(),
            FileKind::Unknown => None,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub file: PathBuf,
}
