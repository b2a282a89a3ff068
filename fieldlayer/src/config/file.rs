//! Reading and writing `config.ini`.
//!
//! A missing file is not an error: every section falls back to the
//! component defaults, so a fresh install runs against the synthetic
//! provider until `fieldlayer init` writes a file to edit.

use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::settings::ConfigFile;

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("malformed INI: {0}")]
    Syntax(#[from] ini::ParseError),

    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: [{section}] {key} = '{value}': {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigFile {
    /// Reads `~/.fieldlayer/config.ini`, or the defaults when it is absent.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Reads `path`, or the defaults when it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        super::parser::parse_ini(&ini)
    }

    pub fn from_ini_str(content: &str) -> Result<Self, ConfigFileError> {
        super::parser::parse_ini(&Ini::load_from_str(content)?)
    }

    /// Writes the commented INI rendering, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        let write_err = |source| ConfigFileError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, super::writer::to_config_string(self)).map_err(write_err)
    }
}

/// `~/.fieldlayer`, or `./.fieldlayer` without a home directory. Holds the
/// config file, the default queue snapshot and the default ledger.
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fieldlayer")
}

pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = ConfigFile::load_from(&temp_dir.path().join("absent.ini")).unwrap();

        assert_eq!(config, ConfigFile::default());
        assert_eq!(config.grid.zoom, DEFAULT_GRID_ZOOM);
        assert_eq!(config.provider.preferred, DEFAULT_PROVIDER_NAME);
        assert!(config.provider.providers.contains_key(DEFAULT_PROVIDER_NAME));
        assert!(config.quota.daily_processing_units.is_none());
        assert!(config.tenants.is_empty());
    }

    #[test]
    fn test_saved_file_loads_back() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.ini");
        let mut config = ConfigFile::default();
        config.cache.cloudy_ttl_days = 1;

        config.save_to(&path).unwrap();
        assert_eq!(ConfigFile::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_malformed_ini_is_a_syntax_error() {
        let err = ConfigFile::from_ini_str("[grid\nzoom = 12\n").unwrap_err();
        assert!(matches!(err, ConfigFileError::Syntax(_)));
    }

    #[test]
    fn test_write_error_names_the_path() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = ConfigFile::default()
            .save_to(&blocker.join("config.ini"))
            .unwrap_err();
        assert!(matches!(err, ConfigFileError::Write { .. }));
        assert!(err.to_string().contains("blocker"));
    }

    #[test]
    fn test_default_paths_share_one_directory() {
        assert!(config_file_path().ends_with(".fieldlayer/config.ini"));
        assert!(default_ledger_path().starts_with(config_directory()));
        assert!(default_queue_snapshot_path().starts_with(config_directory()));
    }
}
