//! CLI runner for common setup.
//!
//! Encapsulates config loading and logging initialization so command
//! handlers start from the same state.

use std::path::{Path, PathBuf};

use tracing::info;

use hgserver::config::{ConfigFile, DEFAULT_LOG_FILE_NAME};
use hgserver::logging::{init_logging, ConsoleOutput, LoggingGuard};

use crate::error::CliError;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
}

impl CliRunner {
    /// Create a runner with optional debug logging.
    ///
    /// Logs always go to the configured log file and are mirrored to
    /// stdout, coloured when stdout is a terminal.
    pub fn with_debug(debug_mode: bool) -> Result<Self, CliError> {
        // Load config file (or use defaults if not present)
        let config = ConfigFile::load()?;

        let log_path = &config.logging.file;
        let log_dir = log_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let log_file = log_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| DEFAULT_LOG_FILE_NAME.to_string());

        let console = ConsoleOutput::for_stdout(atty::is(atty::Stream::Stdout));

        let logging_guard = init_logging(&log_dir, &log_file, console, debug_mode)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("hgserver v{}", hgserver::VERSION);
        info!("hgserver CLI: {} command", command);
    }
}
