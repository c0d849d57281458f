//! Default values and constants for all configuration settings.
//!
//! Contains all `DEFAULT_*` constants, the config directory helpers and the
//! `ConfigFile::default()` implementation.

use std::path::PathBuf;

use super::settings::*;

// =============================================================================
// Defaults
// =============================================================================

/// Name of the per-user configuration directory.
pub const CONFIG_DIR_NAME: &str = ".hgserver";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MAX_DEPTH: usize = 16;
pub const DEFAULT_REMOVAL_GRACE_SECS: u64 = 30;

pub const DEFAULT_NUM_WORKER: usize = 2;
pub const DEFAULT_CONVERSION_TIMEOUT_SECS: u64 = 1800;

pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 2000;
pub const DEFAULT_RETRY_MAX_DELAY_SECS: u64 = 300;

pub const DEFAULT_API_HOST: &str = "127.0.0.1";
pub const DEFAULT_API_PORT: u16 = 8989;

pub const DEFAULT_LOG_FILE_NAME: &str = "hgserver.log";

// =============================================================================
// Paths
// =============================================================================

/// Get the path to the config directory (~/.hgserver).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Get the path to the config file (~/.hgserver/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

/// Default artifact directory (~/.hgserver/tilesets).
pub fn default_artifact_dir() -> PathBuf {
    config_directory().join("tilesets")
}

/// Default log file (~/.hgserver/hgserver.log).
pub fn default_log_file() -> PathBuf {
    config_directory().join(DEFAULT_LOG_FILE_NAME)
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            watch: WatchSettings {
                root: None,
                poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
                max_depth: DEFAULT_MAX_DEPTH,
                removal_grace_secs: DEFAULT_REMOVAL_GRACE_SECS,
            },
            workers: WorkerSettings {
                num_worker: DEFAULT_NUM_WORKER,
                conversion_timeout_secs: DEFAULT_CONVERSION_TIMEOUT_SECS,
            },
            retry: RetrySettings {
                max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
                base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
                max_delay_secs: DEFAULT_RETRY_MAX_DELAY_SECS,
            },
            api: ApiSettings {
                host: DEFAULT_API_HOST.to_string(),
                port: DEFAULT_API_PORT,
            },
            storage: StorageSettings {
                artifact_dir: default_artifact_dir(),
            },
            converter: ConverterSettings::default(),
            logging: LoggingSettings {
                file: default_log_file(),
            },
        }
    }
}
