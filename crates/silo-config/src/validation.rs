//! Configuration validation
//!
//! Validates configuration values and ensures consistency before any
//! backend is constructed.

use thiserror::Error;

use crate::{Config, ObservabilitySettings, PermissionSettings, StorageSettings};

const BACKENDS: &[&str] = &["memory", "postgres", "postgresql"];
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json"];

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid backend: {0} (must be one of: memory, postgresql)")]
    InvalidBackend(String),

    #[error("Missing connection string for backend: {0}")]
    MissingConnectionString(String),

    #[error("Invalid pool size: {0} (must be > 0)")]
    InvalidPoolSize(usize),

    #[error("Invalid pool wait timeout: {0} (must be > 0)")]
    InvalidWaitTimeout(u64),

    #[error("Invalid log level: {0} (must be one of: trace, debug, info, warn, error)")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0} (must be one of: pretty, compact, json)")]
    InvalidLogFormat(String),

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate complete configuration.
pub fn validate(config: &Config) -> ValidationResult<()> {
    let mut errors = Vec::new();

    if let Err(e) = validate_storage(&config.storage) {
        errors.push(e);
    }
    if let Err(e) = validate_permission(&config.permission) {
        errors.push(e);
    }
    if let Err(e) = validate_observability(&config.observability) {
        errors.push(e);
    }

    if errors.is_empty() {
        Ok(())
    } else if errors.len() == 1 {
        Err(errors.into_iter().next().unwrap())
    } else {
        Err(ValidationError::Multiple(errors))
    }
}

fn requires_connection(backend: &str) -> bool {
    backend != "memory"
}

pub fn validate_storage(settings: &StorageSettings) -> ValidationResult<()> {
    if !BACKENDS.contains(&settings.backend.as_str()) {
        return Err(ValidationError::InvalidBackend(settings.backend.clone()));
    }
    if requires_connection(&settings.backend) && settings.connection_string.is_none() {
        return Err(ValidationError::MissingConnectionString(
            settings.backend.clone(),
        ));
    }
    if settings.pool.max_size == 0 {
        return Err(ValidationError::InvalidPoolSize(settings.pool.max_size));
    }
    if settings.pool.wait_timeout_seconds == 0 {
        return Err(ValidationError::InvalidWaitTimeout(
            settings.pool.wait_timeout_seconds,
        ));
    }
    Ok(())
}

pub fn validate_permission(settings: &PermissionSettings) -> ValidationResult<()> {
    if !BACKENDS.contains(&settings.backend.as_str()) {
        return Err(ValidationError::InvalidBackend(settings.backend.clone()));
    }
    if requires_connection(&settings.backend) && settings.connection_string.is_none() {
        return Err(ValidationError::MissingConnectionString(
            settings.backend.clone(),
        ));
    }
    if settings.pool_size == 0 {
        return Err(ValidationError::InvalidPoolSize(settings.pool_size));
    }
    Ok(())
}

pub fn validate_observability(settings: &ObservabilitySettings) -> ValidationResult<()> {
    if !LOG_LEVELS.contains(&settings.log_level.as_str()) {
        return Err(ValidationError::InvalidLogLevel(settings.log_level.clone()));
    }
    if !LOG_FORMATS.contains(&settings.log_format.as_str()) {
        return Err(ValidationError::InvalidLogFormat(
            settings.log_format.clone(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_database_backend_requires_connection_string() {
        let mut config = Config::default();
        config.storage.backend = "postgresql".to_string();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::MissingConnectionString(_))
        ));
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let mut config = Config::default();
        config.permission.backend = "carrier-pigeon".to_string();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidBackend(_))
        ));
    }

    #[test]
    fn test_errors_accumulate() {
        let mut config = Config::default();
        config.storage.pool.max_size = 0;
        config.observability.log_format = "interpretive-dance".to_string();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::Multiple(errors)) if errors.len() == 2
        ));
    }
}
