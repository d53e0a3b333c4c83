//! Storage factory for creating backend instances.
//!
//! Backends are selected at startup from configuration; consumers only
//! ever see `Arc<dyn RecordStore>`.

use std::str::FromStr;
use std::sync::Arc;

use silo_types::{StorageError, StorageResult};

use crate::generators::{IdGenerator, NameGenerator, Uuid4Generator};
use crate::memory::MemoryBackend;
use crate::pool::PoolConfig;
use crate::RecordStore;

#[cfg(feature = "postgres")]
use crate::postgres::PostgresBackend;

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// In-memory storage (for testing and development).
    Memory,
    /// PostgreSQL storage (for production).
    #[cfg(feature = "postgres")]
    Postgres,
}

impl FromStr for BackendType {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(BackendType::Memory),
            #[cfg(feature = "postgres")]
            "postgresql" | "postgres" => Ok(BackendType::Postgres),
            _ => Err(StorageError::Backend(format!(
                "unknown storage backend: {s}"
            ))),
        }
    }
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Memory => "memory",
            #[cfg(feature = "postgres")]
            BackendType::Postgres => "postgresql",
        }
    }
}

/// Configuration for a storage backend.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: BackendType,
    /// Connection string, for database backends.
    pub connection_string: Option<String>,
    /// Pool sizing, for database backends.
    pub pool: PoolConfig,
    /// Custom id pattern; `None` keeps the default UUID4 generator.
    pub id_pattern: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::memory()
    }
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: BackendType::Memory,
            connection_string: None,
            pool: PoolConfig::default(),
            id_pattern: None,
        }
    }

    #[cfg(feature = "postgres")]
    pub fn postgres(connection_string: impl Into<String>) -> Self {
        Self {
            backend: BackendType::Postgres,
            connection_string: Some(connection_string.into()),
            pool: PoolConfig::default(),
            id_pattern: None,
        }
    }

    fn id_generator(&self) -> StorageResult<Arc<dyn IdGenerator>> {
        match &self.id_pattern {
            Some(pattern) => Ok(Arc::new(NameGenerator::with_pattern(pattern)?)),
            None => Ok(Arc::new(Uuid4Generator::new()?)),
        }
    }
}

/// Storage factory for creating backend instances.
pub struct StorageFactory;

impl StorageFactory {
    /// Create a storage backend from configuration.
    pub async fn create(config: StorageConfig) -> StorageResult<Arc<dyn RecordStore>> {
        let id_generator = config.id_generator()?;
        match config.backend {
            BackendType::Memory => {
                Ok(Arc::new(MemoryBackend::with_generator(id_generator)) as Arc<dyn RecordStore>)
            }
            #[cfg(feature = "postgres")]
            BackendType::Postgres => {
                let connection_string = config.connection_string.as_deref().ok_or_else(|| {
                    StorageError::Backend(
                        "postgresql backend requires a connection string".to_string(),
                    )
                })?;
                let backend =
                    PostgresBackend::connect(connection_string, config.pool.clone(), id_generator)
                        .await?;
                Ok(Arc::new(backend) as Arc<dyn RecordStore>)
            }
        }
    }

    /// Create a storage backend from string configuration.
    pub async fn from_str(
        backend: &str,
        connection_string: Option<String>,
    ) -> StorageResult<Arc<dyn RecordStore>> {
        let backend = BackendType::from_str(backend)?;
        let config = StorageConfig {
            backend,
            connection_string,
            ..StorageConfig::default()
        };
        Self::create(config).await
    }

    /// Create a default memory backend.
    pub fn memory() -> Arc<dyn RecordStore> {
        Arc::new(MemoryBackend::new()) as Arc<dyn RecordStore>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_round_trip() {
        assert_eq!(BackendType::from_str("memory").unwrap(), BackendType::Memory);
        assert_eq!(BackendType::Memory.as_str(), "memory");
        assert!(BackendType::from_str("carrier-pigeon").is_err());
    }

    #[tokio::test]
    async fn test_factory_creates_memory_backend() {
        let store = StorageFactory::create(StorageConfig::memory()).await.unwrap();
        assert!(store.initialize_schema().await.is_ok());
    }

    #[tokio::test]
    async fn test_factory_rejects_bad_id_pattern() {
        let config = StorageConfig {
            id_pattern: Some("[unclosed".to_string()),
            ..StorageConfig::memory()
        };
        let result = StorageFactory::create(config).await;
        assert!(matches!(
            result,
            Err(StorageError::InvalidGeneratorConfig(_))
        ));
    }
}
