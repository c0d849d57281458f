//! Logging infrastructure for hgserver.
//!
//! Provides structured logging with file output and optional console output:
//! - Writes to `~/.hgserver/hgserver.log` by default (cleared on start)
//! - Mirrors to stdout, with ANSI colour only when stdout is a terminal
//! - Configurable via RUST_LOG; `--debug` forces debug level

use std::fs;
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// How log lines are mirrored to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleOutput {
    Off,
    /// No colour codes, for journald, containers and pipes.
    Plain,
    Ansi,
}

impl ConsoleOutput {
    /// Console output for a process whose stdout is or is not a terminal.
    pub fn for_stdout(is_terminal: bool) -> Self {
        if is_terminal {
            ConsoleOutput::Ansi
        } else {
            ConsoleOutput::Plain
        }
    }
}

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard will flush and close the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initialize logging.
///
/// Creates the log directory if needed, clears the previous log file, and
/// installs the global subscriber.
///
/// # Arguments
///
/// * `log_dir` - Directory for log files
/// * `log_file` - Log filename (e.g., "hgserver.log")
/// * `console` - Whether and how to mirror to stdout
/// * `debug_mode` - Force debug level regardless of RUST_LOG
///
/// # Errors
///
/// Returns error if the log directory cannot be created or the log file
/// cannot be cleared.
pub fn init_logging(
    log_dir: &Path,
    log_file: &str,
    console: ConsoleOutput,
    debug_mode: bool,
) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;
    fs::write(log_dir.join(log_file), "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true);

    let stdout_layer = (console != ConsoleOutput::Off).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stdout)
            .with_ansi(console == ConsoleOutput::Ansi)
            .with_target(false)
    });

    let env_filter = if debug_mode {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(io::Error::other)?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
