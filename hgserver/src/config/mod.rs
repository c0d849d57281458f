//! User configuration for hgserver.
//!
//! Configuration lives in `~/.hgserver/config.ini`:
//!
//! ```ini
//! [watch]
//! root = ~/data/hic
//! poll_interval_secs = 5
//!
//! [workers]
//! num_worker = 2
//!
//! [converter]
//! matrix = hictools-tiles matrix {input} {output}
//! ```
//!
//! Missing keys fall back to the `DEFAULT_*` constants. Command-line flags
//! override file values; see [`crate::service::ServiceConfig`].

mod defaults;
mod file;
mod keys;
mod parser;
mod settings;
mod writer;

pub use file::{
    config_directory, config_file_path, default_artifact_dir, default_log_file, ApiSettings,
    ConfigFile, ConfigFileError, ConverterSettings, LoggingSettings, RetrySettings,
    StorageSettings, WatchSettings, WorkerSettings, CONFIG_DIR_NAME, DEFAULT_API_HOST,
    DEFAULT_API_PORT, DEFAULT_CONVERSION_TIMEOUT_SECS, DEFAULT_LOG_FILE_NAME, DEFAULT_MAX_DEPTH,
    DEFAULT_NUM_WORKER, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_REMOVAL_GRACE_SECS,
    DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_MAX_DELAY_SECS,
};
pub use keys::{ConfigKey, ConfigKeyError};
