//! # Silo Config - Configuration Management
//!
//! Handles configuration loading from files and environment variables.
//! Environment variables use the `SILO_` prefix with `__` as section
//! separator (`SILO_STORAGE__BACKEND=postgresql`).

pub mod validation;

use std::collections::HashMap;
use std::path::Path;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub permission: PermissionSettings,
    #[serde(default)]
    pub authorization: AuthorizationSettings,
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_backend")]
    pub backend: String,

    pub connection_string: Option<String>,

    /// Pattern caller-supplied record ids must satisfy; `None` keeps the
    /// default UUID4 generator.
    pub id_pattern: Option<String>,

    #[serde(default)]
    pub pool: PoolSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,

    /// Waiters beyond `max_size` tolerated before acquisitions are
    /// rejected outright.
    #[serde(default = "default_pool_max_backlog")]
    pub max_backlog: usize,

    #[serde(default = "default_pool_wait_timeout")]
    pub wait_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionSettings {
    #[serde(default = "default_backend")]
    pub backend: String,

    pub connection_string: Option<String>,

    #[serde(default = "default_pool_max_size")]
    pub pool_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationSettings {
    /// Principals allowed by configuration regardless of stored ACLs,
    /// keyed by setting name (`bucket_write`, `record_create`, ...).
    #[serde(default)]
    pub settings_principals: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `pretty`, `compact` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_pool_max_size() -> usize {
    25
}

fn default_pool_max_backlog() -> usize {
    16
}

fn default_pool_wait_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            connection_string: None,
            id_pattern: None,
            pool: PoolSettings::default(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
            max_backlog: default_pool_max_backlog(),
            wait_timeout_seconds: default_pool_wait_timeout(),
        }
    }
}

impl Default for PermissionSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            connection_string: None,
            pool_size: default_pool_max_size(),
        }
    }
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Load configuration from an optional file, overridden by `SILO_*`
/// environment variables.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    ConfigBuilder::builder()
        .add_source(File::from(path.as_ref()).required(false))
        .add_source(Environment::with_prefix("SILO").separator("__"))
        .build()?
        .try_deserialize()
}

/// Load configuration with defaults.
pub fn load_or_default<P: AsRef<Path>>(path: P) -> Config {
    load(path).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.storage.pool.max_size, 25);
        assert_eq!(config.storage.pool.max_backlog, 16);
        assert_eq!(config.observability.log_format, "pretty");
        assert!(config.authorization.settings_principals.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[storage]
backend = "postgresql"
connection_string = "postgres://localhost/silo"

[storage.pool]
max_backlog = 4

[authorization.settings_principals]
bucket_write = ["account:admin"]
"#
        )
        .unwrap();

        let config = load(file.path()).unwrap();
        assert_eq!(config.storage.backend, "postgresql");
        assert_eq!(config.storage.pool.max_backlog, 4);
        assert_eq!(config.storage.pool.max_size, 25);
        assert_eq!(
            config.authorization.settings_principals["bucket_write"],
            vec!["account:admin".to_string()]
        );
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load("/nonexistent/silo.toml").unwrap();
        assert_eq!(config.storage.backend, "memory");
    }
}
