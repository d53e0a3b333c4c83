//! Permission factory for creating backend instances.

use std::str::FromStr;
use std::sync::Arc;

use silo_types::{PermissionError, PermissionResult};

use crate::memory::MemoryPermissionBackend;
use crate::PermissionStore;

#[cfg(feature = "postgres")]
use crate::postgres::PostgresPermissionBackend;

/// Permission backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionBackendType {
    /// In-memory storage (for testing and development).
    Memory,
    /// PostgreSQL storage (for production).
    #[cfg(feature = "postgres")]
    Postgres,
}

impl FromStr for PermissionBackendType {
    type Err = PermissionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(PermissionBackendType::Memory),
            #[cfg(feature = "postgres")]
            "postgresql" | "postgres" => Ok(PermissionBackendType::Postgres),
            _ => Err(PermissionError::Backend(format!(
                "unknown permission backend: {s}"
            ))),
        }
    }
}

impl PermissionBackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionBackendType::Memory => "memory",
            #[cfg(feature = "postgres")]
            PermissionBackendType::Postgres => "postgresql",
        }
    }
}

/// Configuration for a permission backend.
#[derive(Debug, Clone)]
pub struct PermissionConfig {
    pub backend: PermissionBackendType,
    /// Connection string, for database backends.
    pub connection_string: Option<String>,
    /// Upper bound on pooled connections, for database backends.
    pub pool_size: usize,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self::memory()
    }
}

impl PermissionConfig {
    pub fn memory() -> Self {
        Self {
            backend: PermissionBackendType::Memory,
            connection_string: None,
            pool_size: 25,
        }
    }

    #[cfg(feature = "postgres")]
    pub fn postgres(connection_string: impl Into<String>) -> Self {
        Self {
            backend: PermissionBackendType::Postgres,
            connection_string: Some(connection_string.into()),
            pool_size: 25,
        }
    }
}

/// Permission factory for creating backend instances.
pub struct PermissionFactory;

impl PermissionFactory {
    /// Create a permission backend from configuration.
    pub async fn create(config: PermissionConfig) -> PermissionResult<Arc<dyn PermissionStore>> {
        match config.backend {
            PermissionBackendType::Memory => {
                Ok(Arc::new(MemoryPermissionBackend::new()) as Arc<dyn PermissionStore>)
            }
            #[cfg(feature = "postgres")]
            PermissionBackendType::Postgres => {
                let connection_string = config.connection_string.as_deref().ok_or_else(|| {
                    PermissionError::Backend(
                        "postgresql backend requires a connection string".to_string(),
                    )
                })?;
                let backend =
                    PostgresPermissionBackend::connect(connection_string, config.pool_size)
                        .await?;
                Ok(Arc::new(backend) as Arc<dyn PermissionStore>)
            }
        }
    }

    /// Create a default memory backend.
    pub fn memory() -> Arc<dyn PermissionStore> {
        Arc::new(MemoryPermissionBackend::new()) as Arc<dyn PermissionStore>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_round_trip() {
        assert_eq!(
            PermissionBackendType::from_str("memory").unwrap(),
            PermissionBackendType::Memory
        );
        assert_eq!(PermissionBackendType::Memory.as_str(), "memory");
        assert!(PermissionBackendType::from_str("papyrus").is_err());
    }

    #[tokio::test]
    async fn test_factory_creates_memory_backend() {
        let store = PermissionFactory::create(PermissionConfig::memory())
            .await
            .unwrap();
        assert!(store.initialize_schema().await.is_ok());
    }
}
