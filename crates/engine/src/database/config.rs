//! Store configuration via `vellum.toml`
//!
//! Every field has a default, so an empty file (or no file at all) yields
//! [`StoreConfig::default`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, StoreError};

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "vellum.toml";

/// Store configuration
///
/// # Example
///
/// ```toml
/// keep_all_versions = true
/// filter_soft_deleted = true
/// max_scan_limit = 1000
/// update_channel_capacity = 1024
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maintain the historic mirrors of table, index and unique namespaces
    pub keep_all_versions: bool,
    /// Hide soft-deleted records unless a read asks otherwise
    pub filter_soft_deleted: bool,
    /// Upper bound on records returned by one scan
    pub max_scan_limit: u32,
    /// Buffered events per update subscriber
    pub update_channel_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            keep_all_versions: true,
            filter_soft_deleted: true,
            max_scan_limit: 1000,
            update_channel_capacity: 1024,
        }
    }
}

impl StoreConfig {
    /// Config without historic mirrors
    pub fn latest_only() -> Self {
        StoreConfig {
            keep_all_versions: false,
            ..Self::default()
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Vellum store configuration
#
# Keep per-version history of every record, index and unique binding.
# Required for reads at an earlier version and for windowed change reads.
keep_all_versions = true

# Hide soft-deleted records from reads unless a request overrides it.
filter_soft_deleted = true

# Maximum number of records a single scan returns.
max_scan_limit = 1000

# Events buffered per subscriber before slow subscribers start lagging.
update_channel_capacity = 1024
"#
    }

    /// Parse config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or a value is out of range.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(content)
            .map_err(|e| StoreError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| StoreError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            StoreError::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    fn validate(&self) -> Result<()> {
        if self.max_scan_limit == 0 {
            return Err(StoreError::Config("max_scan_limit must be at least 1".into()));
        }
        if self.update_channel_capacity == 0 {
            return Err(StoreError::Config(
                "update_channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_toml_parses_to_default() {
        let config = StoreConfig::from_toml_str(StoreConfig::default_toml()).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = StoreConfig::from_toml_str("").unwrap();
        assert!(config.keep_all_versions);
        assert_eq!(config.max_scan_limit, 1000);
    }

    #[test]
    fn partial_toml_overrides() {
        let config = StoreConfig::from_toml_str("keep_all_versions = false\nmax_scan_limit = 5").unwrap();
        assert!(!config.keep_all_versions);
        assert!(config.filter_soft_deleted);
        assert_eq!(config.max_scan_limit, 5);
    }

    #[test]
    fn zero_limit_rejected() {
        assert!(StoreConfig::from_toml_str("max_scan_limit = 0").is_err());
    }

    #[test]
    fn invalid_toml_returns_error() {
        assert!(StoreConfig::from_toml_str("keep_all_versions = \"yes\"").is_err());
    }

    #[test]
    fn write_then_read_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = StoreConfig::latest_only();
        config.write_to_file(&path).unwrap();
        assert_eq!(StoreConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_returns_error() {
        let dir = TempDir::new().unwrap();
        assert!(StoreConfig::from_file(&dir.path().join("absent.toml")).is_err());
    }
}
