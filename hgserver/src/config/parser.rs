//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This module is the single place where INI key names are mapped to struct
//! fields. [`apply_value`] is shared with `config set` so both paths validate
//! values the same way.

use std::path::PathBuf;
use std::str::FromStr;

use ini::Ini;
use tracing::warn;

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the
/// INI. Unknown sections and keys are logged and ignored.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    for (section, properties) in ini.iter() {
        let Some(section) = section else {
            continue;
        };
        for (key, value) in properties.iter() {
            if !apply_value(&mut config, section, key, value)? {
                warn!(section, key, "Ignoring unknown configuration key");
            }
        }
    }

    Ok(config)
}

/// Set one `section.key` on `config` from its string form.
///
/// Returns `Ok(false)` if the key is not recognised.
pub(super) fn apply_value(
    config: &mut ConfigFile,
    section: &str,
    key: &str,
    value: &str,
) -> Result<bool, ConfigFileError> {
    let value = value.trim();
    match (section, key) {
        // [watch] section
        ("watch", "root") => {
            config.watch.root = optional_path(value);
        }
        ("watch", "poll_interval_secs") => {
            config.watch.poll_interval_secs =
                parse_positive(section, key, value, "must be a positive integer (seconds)")?;
        }
        ("watch", "max_depth") => {
            config.watch.max_depth =
                parse_positive(section, key, value, "must be a positive integer")?;
        }
        ("watch", "removal_grace_secs") => {
            config.watch.removal_grace_secs =
                parse_number(section, key, value, "must be a non-negative integer (seconds)")?;
        }

        // [workers] section
        ("workers", "num_worker") => {
            config.workers.num_worker =
                parse_positive(section, key, value, "must be a positive integer")?;
        }
        ("workers", "conversion_timeout_secs") => {
            config.workers.conversion_timeout_secs =
                parse_positive(section, key, value, "must be a positive integer (seconds)")?;
        }

        // [retry] section
        ("retry", "max_attempts") => {
            config.retry.max_attempts =
                parse_positive(section, key, value, "must be a positive integer")?;
        }
        ("retry", "base_delay_ms") => {
            config.retry.base_delay_ms =
                parse_number(section, key, value, "must be a non-negative integer (milliseconds)")?;
        }
        ("retry", "max_delay_secs") => {
            config.retry.max_delay_secs =
                parse_number(section, key, value, "must be a non-negative integer (seconds)")?;
        }

        // [api] section
        ("api", "host") => {
            if value.is_empty() {
                return Err(invalid(section, key, value, "must not be empty"));
            }
            config.api.host = value.to_string();
        }
        ("api", "port") => {
            config.api.port = parse_positive(section, key, value, "must be a port number (1-65535)")?;
        }

        // [storage] section
        ("storage", "artifact_dir") => {
            if value.is_empty() {
                return Err(invalid(section, key, value, "must not be empty"));
            }
            config.storage.artifact_dir = expand_tilde(value);
        }

        // [converter] section
        ("converter", "matrix") => config.converter.matrix = optional_string(value),
        ("converter", "alignment") => config.converter.alignment = optional_string(value),
        ("converter", "signal_track") => config.converter.signal_track = optional_string(value),
        ("converter", "annotation_track") => {
            config.converter.annotation_track = optional_string(value)
        }

        // [logging] section
        ("logging", "file") => {
            if !value.is_empty() {
                config.logging.file = expand_tilde(value);
            }
        }

        _ => return Ok(false),
    }
    Ok(true)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value.parse().map_err(|_| invalid(section, key, value, reason))
}

fn parse_positive<T: FromStr + PartialOrd + Default>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    let parsed: T = parse_number(section, key, value, reason)?;
    if parsed <= T::default() {
        return Err(invalid(section, key, value, reason));
    }
    Ok(parsed)
}

fn optional_string(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn optional_path(value: &str) -> Option<PathBuf> {
    (!value.is_empty()).then(|| expand_tilde(value))
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::*;

    fn parse(content: &str) -> Result<ConfigFile, ConfigFileError> {
        let ini = Ini::load_from_str(content).unwrap();
        parse_ini(&ini)
    }

    #[test]
    fn test_empty_ini_gives_defaults() {
        assert_eq!(parse("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_parse_all_sections() {
        let config = parse(
            r#"
[watch]
root = /data/hic
poll_interval_secs = 10
max_depth = 4
removal_grace_secs = 0

[workers]
num_worker = 6
conversion_timeout_secs = 60

[retry]
max_attempts = 5
base_delay_ms = 500
max_delay_secs = 20

[api]
host = 0.0.0.0
port = 9000

[storage]
artifact_dir = /srv/tilesets

[converter]
matrix = tiler cool {input} {output}
signal_track =

[logging]
file = /var/log/hgserver.log
"#,
        )
        .unwrap();

        assert_eq!(config.watch.root, Some(PathBuf::from("/data/hic")));
        assert_eq!(config.watch.poll_interval_secs, 10);
        assert_eq!(config.watch.max_depth, 4);
        assert_eq!(config.watch.removal_grace_secs, 0);
        assert_eq!(config.workers.num_worker, 6);
        assert_eq!(config.workers.conversion_timeout_secs, 60);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.retry.max_delay_secs, 20);
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.storage.artifact_dir, PathBuf::from("/srv/tilesets"));
        assert_eq!(
            config.converter.matrix.as_deref(),
            Some("tiler cool {input} {output}")
        );
        assert!(config.converter.signal_track.is_none());
        assert_eq!(config.logging.file, PathBuf::from("/var/log/hgserver.log"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for content in [
            "[workers]\nnum_worker = 0",
            "[workers]\nnum_worker = many",
            "[watch]\npoll_interval_secs = -1",
            "[api]\nport = 70000",
            "[api]\nport = 0",
            "[retry]\nmax_attempts = 0",
        ] {
            let err = parse(content).unwrap_err();
            assert!(
                matches!(err, ConfigFileError::InvalidValue { .. }),
                "{}",
                content
            );
        }
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let config = parse("[watch]\nfrobnicate = yes\n[mystery]\nx = 1").unwrap();
        assert_eq!(config.watch.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/tiles"), home.join("tiles"));
        }
        assert_eq!(expand_tilde("/abs"), PathBuf::from("/abs"));
    }
}
