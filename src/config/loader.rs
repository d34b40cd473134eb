//! Configuration loading and saving.
//!
//! One TOML file at a fixed per-user location (overridable on the command
//! line). A missing file is not an error: defaults apply, and the file is
//! created on the first persisted change.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::Config;

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "firewatch";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Default per-user configuration path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join(USER_CONFIG_DIR)
        .join(USER_CONFIG_FILE)
}

/// Loads, normalizes, and validates the configuration at `path`.
///
/// A missing file yields the defaults. Invalid TOML or an invalid node
/// address is an error.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let mut config = match fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            Config::default()
        }
        Err(e) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    config.normalize();
    config.validate()?;
    Ok(config)
}

/// Writes the configuration to `path`, creating parent directories as
/// needed.
pub fn save(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let contents = toml::to_string_pretty(config)?;
    fs::write(path, contents).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    debug!(path = %path.display(), "wrote config");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load(&dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(config.prompts.default_action, "deny");
        assert_eq!(config.server.listen_addr, "127.0.0.1:50051");
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid TOML [[[").unwrap();
        assert!(matches!(load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn values_normalize_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
            [prompts]
            default_action = "obliterate"
            timeout_secs = 1
            "#,
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.prompts.default_action, "deny");
        assert_eq!(config.prompts.timeout_secs, 5);
    }

    #[test]
    fn save_round_trips_and_creates_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.ui.theme = "solarized".to_string();
        config.nodes = vec!["10.0.0.5:50051".to_string()];
        save(&path, &config).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.ui.theme, "solarized");
        assert_eq!(loaded.nodes, config.nodes);
    }

    #[test]
    fn bad_node_address_fails_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "nodes = [\"no-port-here\"]").unwrap();
        assert!(matches!(
            load(&path),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
