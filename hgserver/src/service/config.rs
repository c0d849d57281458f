//! Service configuration types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::ServiceError;
use crate::catalog::{FileKind, CATALOG_FILE_NAME};
use crate::config::{
    default_artifact_dir, ConfigFile, ConverterSettings, DEFAULT_API_HOST, DEFAULT_API_PORT,
};
use crate::convert::CommandConverter;
use crate::dispatch::RetryPolicy;
use crate::watcher::{DEFAULT_MAX_DEPTH, DEFAULT_POLL_INTERVAL, DEFAULT_REMOVAL_GRACE};
use crate::worker::{DEFAULT_CONVERSION_TIMEOUT, DEFAULT_NUM_WORKERS};

/// Configuration for a running hgserver instance.
///
/// # Example
///
/// ```
/// use hgserver::service::ServiceConfig;
/// use std::time::Duration;
///
/// let config = ServiceConfig::builder()
///     .watch_root("/data/hic")
///     .num_workers(4)
///     .poll_interval(Duration::from_secs(2))
///     .build()
///     .unwrap();
///
/// assert_eq!(config.num_workers(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    watch_root: PathBuf,
    artifact_dir: PathBuf,
    poll_interval: Duration,
    max_depth: usize,
    removal_grace: Duration,
    num_workers: usize,
    conversion_timeout: Duration,
    retry: RetryPolicy,
    api_host: String,
    api_port: u16,
}

impl ServiceConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Directory watched for source files.
    pub fn watch_root(&self) -> &Path {
        &self.watch_root
    }

    /// Directory holding tile packs and the catalog snapshot.
    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Path of the persisted catalog.
    pub fn catalog_path(&self) -> PathBuf {
        self.artifact_dir.join(CATALOG_FILE_NAME)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn removal_grace(&self) -> Duration {
        self.removal_grace
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn conversion_timeout(&self) -> Duration {
        self.conversion_timeout
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Address the API server binds to, as `host:port`.
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

/// Builder for ServiceConfig.
///
/// Unset values fall back to the library defaults; only the watch root is
/// required.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfigBuilder {
    watch_root: Option<PathBuf>,
    artifact_dir: Option<PathBuf>,
    poll_interval: Option<Duration>,
    max_depth: Option<usize>,
    removal_grace: Option<Duration>,
    num_workers: Option<usize>,
    conversion_timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    api_host: Option<String>,
    api_port: Option<u16>,
}

impl ServiceConfigBuilder {
    /// Start from the values in a config file.
    pub fn from_config_file(config: &ConfigFile) -> Self {
        Self {
            watch_root: config.watch.root.clone(),
            artifact_dir: Some(config.storage.artifact_dir.clone()),
            poll_interval: Some(Duration::from_secs(config.watch.poll_interval_secs)),
            max_depth: Some(config.watch.max_depth),
            removal_grace: Some(Duration::from_secs(config.watch.removal_grace_secs)),
            num_workers: Some(config.workers.num_worker),
            conversion_timeout: Some(Duration::from_secs(config.workers.conversion_timeout_secs)),
            retry: Some(RetryPolicy::new(
                config.retry.max_attempts,
                Duration::from_millis(config.retry.base_delay_ms),
                Duration::from_secs(config.retry.max_delay_secs),
            )),
            api_host: Some(config.api.host.clone()),
            api_port: Some(config.api.port),
        }
    }

    pub fn watch_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.watch_root = Some(path.into());
        self
    }

    pub fn artifact_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(path.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// How long a file may be missing before its tilesets are removed.
    pub fn removal_grace(mut self, grace: Duration) -> Self {
        self.removal_grace = Some(grace);
        self
    }

    pub fn num_workers(mut self, workers: usize) -> Self {
        self.num_workers = Some(workers);
        self
    }

    pub fn conversion_timeout(mut self, timeout: Duration) -> Self {
        self.conversion_timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = Some(host.into());
        self
    }

    /// Port 0 picks a free port; see `ServiceHandle::local_addr`.
    pub fn api_port(mut self, port: u16) -> Self {
        self.api_port = Some(port);
        self
    }

    /// Build the configuration with defaults for unset values.
    pub fn build(self) -> Result<ServiceConfig, ServiceError> {
        let watch_root = self.watch_root.ok_or_else(|| {
            ServiceError::ConfigError(
                "no watch root given (pass one on the command line or set watch.root)".into(),
            )
        })?;
        let num_workers = self.num_workers.unwrap_or(DEFAULT_NUM_WORKERS);
        if num_workers == 0 {
            return Err(ServiceError::ConfigError(
                "num_worker must be at least 1".into(),
            ));
        }

        Ok(ServiceConfig {
            watch_root,
            artifact_dir: self.artifact_dir.unwrap_or_else(default_artifact_dir),
            poll_interval: self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            max_depth: self.max_depth.unwrap_or(DEFAULT_MAX_DEPTH),
            removal_grace: self.removal_grace.unwrap_or(DEFAULT_REMOVAL_GRACE),
            num_workers,
            conversion_timeout: self
                .conversion_timeout
                .unwrap_or(DEFAULT_CONVERSION_TIMEOUT),
            retry: self.retry.unwrap_or_default(),
            api_host: self
                .api_host
                .unwrap_or_else(|| DEFAULT_API_HOST.to_string()),
            api_port: self.api_port.unwrap_or(DEFAULT_API_PORT),
        })
    }
}

/// Build the external-command converter from the `[converter]` section.
pub fn command_converter(settings: &ConverterSettings) -> CommandConverter {
    FileKind::CONVERTIBLE
        .iter()
        .fold(CommandConverter::new(), |converter, kind| {
            match settings.template(*kind) {
                Some(template) => converter.with_template(*kind, template),
                None => converter,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_watch_root() {
        let err = ServiceConfig::builder().build().unwrap_err();
        assert!(matches!(err, ServiceError::ConfigError(_)));
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::builder().watch_root("/data").build().unwrap();

        assert_eq!(config.num_workers(), DEFAULT_NUM_WORKERS);
        assert_eq!(config.poll_interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(config.api_addr(), "127.0.0.1:8989");
        assert_eq!(config.catalog_path(), default_artifact_dir().join("catalog.json"));
    }

    #[test]
    fn test_cli_values_override_config_file() {
        let mut file = ConfigFile::default();
        file.watch.root = Some(PathBuf::from("/from/file"));
        file.workers.num_worker = 8;
        file.api.port = 9000;

        let config = ServiceConfigBuilder::from_config_file(&file)
            .watch_root("/from/cli")
            .api_port(0)
            .build()
            .unwrap();

        assert_eq!(config.watch_root(), Path::new("/from/cli"));
        assert_eq!(config.num_workers(), 8);
        assert_eq!(config.api_addr(), "127.0.0.1:0");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = ServiceConfig::builder()
            .watch_root("/data")
            .num_workers(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ServiceError::ConfigError(_)));
    }

    #[test]
    fn test_command_converter_from_settings() {
        let settings = ConverterSettings {
            matrix: Some("tiles-matrix {input} {output}".into()),
            signal_track: Some("tiles-bw {input} {output}".into()),
            ..Default::default()
        };

        let converter = command_converter(&settings);

        assert_eq!(
            converter.configured_kinds(),
            vec![FileKind::Matrix, FileKind::SignalTrack]
        );
    }
}
