//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::io;
use std::process;

use hgserver::catalog::CatalogError;
use hgserver::config::ConfigFileError;
use hgserver::service::ServiceError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Service failed to start or stopped with an error
    Serve(ServiceError),
    /// Catalog could not be read
    Catalog(CatalogError),
    /// Failed to build the async runtime or install the signal handler
    Runtime(io::Error),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        // Print additional help for specific errors
        match self {
            CliError::Serve(ServiceError::ConfigError(_)) => {
                eprintln!();
                eprintln!("Pass the directory to watch: hgserver serve <root>");
                eprintln!("Or set it once: hgserver config set watch.root <root>");
            }
            CliError::Serve(ServiceError::ArtifactDir { .. }) => {
                eprintln!();
                eprintln!("Choose a writable location with --artifact-dir <dir>");
                eprintln!("or: hgserver config set storage.artifact_dir <dir>");
            }
            CliError::Serve(ServiceError::Bind { .. }) => {
                eprintln!();
                eprintln!("Common issues:");
                eprintln!("  1. Port in use: another hgserver may already be running");
                eprintln!("  2. Try a different port with --api-port <port>");
            }
            CliError::Serve(ServiceError::Catalog(_)) | CliError::Catalog(_) => {
                eprintln!();
                eprintln!("The catalog snapshot could not be loaded.");
                eprintln!("Move catalog.json out of the artifact directory to rebuild it;");
                eprintln!("every file will be converted again.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Serve(e) => write!(f, "{}", e),
            CliError::Catalog(e) => write!(f, "Failed to read catalog: {}", e),
            CliError::Runtime(e) => write!(f, "Runtime error: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Serve(e) => Some(e),
            CliError::Catalog(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ServiceError> for CliError {
    fn from(e: ServiceError) -> Self {
        CliError::Serve(e)
    }
}

impl From<CatalogError> for CliError {
    fn from(e: CatalogError) -> Self {
        CliError::Catalog(e)
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}
