//! Configuration key access for `hgserver config get|set|list`.
//!
//! Keys are addressed as `section.key`. Setting a value goes through the
//! same validation as loading the file.

use std::str::FromStr;

use thiserror::Error;

use super::file::{ConfigFile, ConfigFileError};
use super::writer::path_to_string;

/// Errors that can occur when getting or setting configuration values.
#[derive(Debug, Error)]
pub enum ConfigKeyError {
    /// Unknown configuration key.
    #[error("Unknown configuration key '{0}'")]
    UnknownKey(String),

    /// Validation failed for the value.
    #[error("Invalid value for {key}: {reason}")]
    ValidationFailed { key: String, reason: String },
}

/// Supported configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    WatchRoot,
    WatchPollIntervalSecs,
    WatchMaxDepth,
    WatchRemovalGraceSecs,

    WorkersNumWorker,
    WorkersConversionTimeoutSecs,

    RetryMaxAttempts,
    RetryBaseDelayMs,
    RetryMaxDelaySecs,

    ApiHost,
    ApiPort,

    StorageArtifactDir,

    ConverterMatrix,
    ConverterAlignment,
    ConverterSignalTrack,
    ConverterAnnotationTrack,

    LoggingFile,
}

impl ConfigKey {
    /// Every key, in file order.
    pub const ALL: [ConfigKey; 17] = [
        ConfigKey::WatchRoot,
        ConfigKey::WatchPollIntervalSecs,
        ConfigKey::WatchMaxDepth,
        ConfigKey::WatchRemovalGraceSecs,
        ConfigKey::WorkersNumWorker,
        ConfigKey::WorkersConversionTimeoutSecs,
        ConfigKey::RetryMaxAttempts,
        ConfigKey::RetryBaseDelayMs,
        ConfigKey::RetryMaxDelaySecs,
        ConfigKey::ApiHost,
        ConfigKey::ApiPort,
        ConfigKey::StorageArtifactDir,
        ConfigKey::ConverterMatrix,
        ConfigKey::ConverterAlignment,
        ConfigKey::ConverterSignalTrack,
        ConfigKey::ConverterAnnotationTrack,
        ConfigKey::LoggingFile,
    ];

    /// Get the canonical key name (e.g., "workers.num_worker").
    pub fn name(&self) -> &'static str {
        match self {
            ConfigKey::WatchRoot => "watch.root",
            ConfigKey::WatchPollIntervalSecs => "watch.poll_interval_secs",
            ConfigKey::WatchMaxDepth => "watch.max_depth",
            ConfigKey::WatchRemovalGraceSecs => "watch.removal_grace_secs",
            ConfigKey::WorkersNumWorker => "workers.num_worker",
            ConfigKey::WorkersConversionTimeoutSecs => "workers.conversion_timeout_secs",
            ConfigKey::RetryMaxAttempts => "retry.max_attempts",
            ConfigKey::RetryBaseDelayMs => "retry.base_delay_ms",
            ConfigKey::RetryMaxDelaySecs => "retry.max_delay_secs",
            ConfigKey::ApiHost => "api.host",
            ConfigKey::ApiPort => "api.port",
            ConfigKey::StorageArtifactDir => "storage.artifact_dir",
            ConfigKey::ConverterMatrix => "converter.matrix",
            ConfigKey::ConverterAlignment => "converter.alignment",
            ConfigKey::ConverterSignalTrack => "converter.signal_track",
            ConfigKey::ConverterAnnotationTrack => "converter.annotation_track",
            ConfigKey::LoggingFile => "logging.file",
        }
    }

    /// Get the section name (e.g., "workers").
    pub fn section(&self) -> &'static str {
        self.name().split('.').next().unwrap_or("")
    }

    /// Get the key name within the section (e.g., "num_worker").
    pub fn key_name(&self) -> &'static str {
        self.name().split('.').nth(1).unwrap_or(self.name())
    }

    /// Get the value from a config file as a string.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            ConfigKey::WatchRoot => config
                .watch
                .root
                .as_ref()
                .map(|p| path_to_string(p))
                .unwrap_or_default(),
            ConfigKey::WatchPollIntervalSecs => config.watch.poll_interval_secs.to_string(),
            ConfigKey::WatchMaxDepth => config.watch.max_depth.to_string(),
            ConfigKey::WatchRemovalGraceSecs => config.watch.removal_grace_secs.to_string(),
            ConfigKey::WorkersNumWorker => config.workers.num_worker.to_string(),
            ConfigKey::WorkersConversionTimeoutSecs => {
                config.workers.conversion_timeout_secs.to_string()
            }
            ConfigKey::RetryMaxAttempts => config.retry.max_attempts.to_string(),
            ConfigKey::RetryBaseDelayMs => config.retry.base_delay_ms.to_string(),
            ConfigKey::RetryMaxDelaySecs => config.retry.max_delay_secs.to_string(),
            ConfigKey::ApiHost => config.api.host.clone(),
            ConfigKey::ApiPort => config.api.port.to_string(),
            ConfigKey::StorageArtifactDir => path_to_string(&config.storage.artifact_dir),
            ConfigKey::ConverterMatrix => config.converter.matrix.clone().unwrap_or_default(),
            ConfigKey::ConverterAlignment => {
                config.converter.alignment.clone().unwrap_or_default()
            }
            ConfigKey::ConverterSignalTrack => {
                config.converter.signal_track.clone().unwrap_or_default()
            }
            ConfigKey::ConverterAnnotationTrack => {
                config.converter.annotation_track.clone().unwrap_or_default()
            }
            ConfigKey::LoggingFile => path_to_string(&config.logging.file),
        }
    }

    /// Validate and set a value on a config file.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigKeyError> {
        match super::parser::apply_value(config, self.section(), self.key_name(), value) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ConfigKeyError::UnknownKey(self.name().to_string())),
            Err(ConfigFileError::InvalidValue { reason, .. }) => {
                Err(ConfigKeyError::ValidationFailed {
                    key: self.name().to_string(),
                    reason,
                })
            }
            Err(e) => Err(ConfigKeyError::ValidationFailed {
                key: self.name().to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ConfigKey::ALL
            .into_iter()
            .find(|key| key.name() == wanted)
            .ok_or_else(|| ConfigKeyError::UnknownKey(s.to_string()))
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_every_key_parses_from_its_name() {
        for key in ConfigKey::ALL {
            assert_eq!(key.name().parse::<ConfigKey>().unwrap(), key);
        }
        assert!(matches!(
            "watch.nope".parse::<ConfigKey>(),
            Err(ConfigKeyError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_set_then_get() {
        let mut config = ConfigFile::default();

        ConfigKey::WorkersNumWorker.set(&mut config, "8").unwrap();
        ConfigKey::WatchRoot.set(&mut config, "/data/hic").unwrap();
        ConfigKey::ConverterSignalTrack
            .set(&mut config, "bw2tiles {input} {output}")
            .unwrap();

        assert_eq!(config.workers.num_worker, 8);
        assert_eq!(config.watch.root, Some(PathBuf::from("/data/hic")));
        assert_eq!(
            ConfigKey::ConverterSignalTrack.get(&config),
            "bw2tiles {input} {output}"
        );
    }

    #[test]
    fn test_set_validates() {
        let mut config = ConfigFile::default();
        let err = ConfigKey::ApiPort.set(&mut config, "http").unwrap_err();
        assert!(matches!(err, ConfigKeyError::ValidationFailed { .. }));
        assert_eq!(config.api.port, crate::config::DEFAULT_API_PORT);
    }

    #[test]
    fn test_section_and_key_name() {
        assert_eq!(ConfigKey::RetryBaseDelayMs.section(), "retry");
        assert_eq!(ConfigKey::RetryBaseDelayMs.key_name(), "base_delay_ms");
    }
}
