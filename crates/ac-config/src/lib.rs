//! Access Cache Configuration System
//!
//! This crate provides TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Environment variable error: {0}")]
    EnvError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Principal cache behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Keep valid entries in the table after their last handle is released
    pub retain_released: bool,
    /// Accept principal documents written in the legacy (v1) schema
    pub accept_legacy_schema: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retain_released: true,
            accept_legacy_schema: true,
        }
    }
}

/// Principal document store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Optional JSON file of principal documents used to seed the in-memory store
    pub documents_path: String,
}

impl StoreConfig {
    pub fn documents_path(&self) -> Option<&Path> {
        if self.documents_path.is_empty() {
            None
        } else {
            Some(Path::new(&self.documents_path))
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub service_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            service_name: "access-cache".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration using the default loader
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.logging.service_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "logging.service_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate example TOML configuration
    pub fn example_toml() -> String {
        r#"# Access Cache Configuration

[cache]
retain_released = true
accept_legacy_schema = true

[store]
documents_path = ""  # optional JSON seed file for the in-memory store

[logging]
service_name = "access-cache"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.cache.retain_released);
        assert!(config.cache.accept_legacy_schema);
        assert!(config.store.documents_path().is_none());
        assert_eq!(config.logging.service_name, "access-cache");
    }

    #[test]
    fn test_example_toml_parses() {
        let config = AppConfig::from_toml(&AppConfig::example_toml()).unwrap();
        assert!(config.cache.retain_released);
        assert!(config.store.documents_path().is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml("[cache]\naccept_legacy_schema = false\n").unwrap();
        assert!(!config.cache.accept_legacy_schema);
        assert!(config.cache.retain_released);
        assert_eq!(config.logging.service_name, "access-cache");
    }

    #[test]
    fn test_empty_service_name_rejected() {
        let err = AppConfig::from_toml("[logging]\nservice_name = \"  \"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[store]\ndocuments_path = \"/var/lib/principals.json\"").unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(
            config.store.documents_path(),
            Some(Path::new("/var/lib/principals.json"))
        );
    }

    #[test]
    fn test_invalid_toml() {
        let err = AppConfig::from_toml("[cache\nretain_released = 1").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
