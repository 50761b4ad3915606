//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "access-cache.toml",
    "./config/config.toml",
    "./config/access-cache.toml",
    "/etc/access-cache/config.toml",
];

/// Environment variable naming an explicit config file
const CONFIG_ENV: &str = "ACCESS_CACHE_CONFIG";

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Same as [`load`](Self::load) but reads overrides through `lookup`.
    pub fn load_with<F>(&self, lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file(&lookup) {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, &lookup)?;
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file<F>(&self, lookup: &F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Some(path) = lookup(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_overrides<F>(config: &mut AppConfig, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Cache
    if let Some(val) = lookup("ACCESS_CACHE_RETAIN_RELEASED") {
        config.cache.retain_released = parse_bool("ACCESS_CACHE_RETAIN_RELEASED", &val)?;
    }
    if let Some(val) = lookup("ACCESS_CACHE_ACCEPT_LEGACY_SCHEMA") {
        config.cache.accept_legacy_schema = parse_bool("ACCESS_CACHE_ACCEPT_LEGACY_SCHEMA", &val)?;
    }

    // Store
    if let Some(val) = lookup("ACCESS_CACHE_DOCUMENTS_PATH") {
        config.store.documents_path = val;
    }

    // Logging
    if let Some(val) = lookup("ACCESS_CACHE_SERVICE_NAME") {
        config.logging.service_name = val;
    }

    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::EnvError(format!("{key}: expected true or false, got {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nretain_released = true").unwrap();

        let loader = ConfigLoader::with_path(file.path());
        let config = loader
            .load_with(lookup_from(&[
                ("ACCESS_CACHE_RETAIN_RELEASED", "false"),
                ("ACCESS_CACHE_DOCUMENTS_PATH", "/tmp/principals.json"),
            ]))
            .unwrap();

        assert!(!config.cache.retain_released);
        assert_eq!(config.store.documents_path, "/tmp/principals.json");
    }

    #[test]
    fn test_config_path_from_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nservice_name = \"auth-edge\"").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = ConfigLoader::new()
            .load_with(lookup_from(&[(CONFIG_ENV, path.as_str())]))
            .unwrap();
        assert_eq!(config.logging.service_name, "auth-edge");
    }

    #[test]
    fn test_invalid_bool_override() {
        let err = ConfigLoader::with_path("/nonexistent/access-cache.toml")
            .load_with(lookup_from(&[("ACCESS_CACHE_ACCEPT_LEGACY_SCHEMA", "sometimes")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EnvError(_)));
    }
}
