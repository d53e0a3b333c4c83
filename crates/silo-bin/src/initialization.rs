//! Backend construction from configuration.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use silo_config::Config;
use silo_core::RecordEngine;
use silo_permission::{
    PermissionBackendType, PermissionConfig, PermissionFactory, PermissionStore,
};
use silo_store::{BackendType, PoolConfig, RecordStore, StorageConfig, StorageFactory};
use silo_types::PrincipalSet;

pub async fn build_record_store(config: &Config) -> Result<Arc<dyn RecordStore>> {
    let backend = BackendType::from_str(&config.storage.backend)
        .context("selecting storage backend")?;
    let storage_config = StorageConfig {
        backend,
        connection_string: config.storage.connection_string.clone(),
        pool: PoolConfig {
            max_size: config.storage.pool.max_size,
            max_backlog: config.storage.pool.max_backlog,
            wait_timeout: Duration::from_secs(config.storage.pool.wait_timeout_seconds),
        },
        id_pattern: config.storage.id_pattern.clone(),
    };
    let store = StorageFactory::create(storage_config)
        .await
        .context("initializing storage backend")?;
    tracing::info!(backend = %config.storage.backend, "storage backend ready");
    Ok(store)
}

pub async fn build_permission_store(config: &Config) -> Result<Arc<dyn PermissionStore>> {
    let backend = PermissionBackendType::from_str(&config.permission.backend)
        .context("selecting permission backend")?;
    let permission_config = PermissionConfig {
        backend,
        connection_string: config.permission.connection_string.clone(),
        pool_size: config.permission.pool_size,
    };
    let store = PermissionFactory::create(permission_config)
        .await
        .context("initializing permission backend")?;
    tracing::info!(backend = %config.permission.backend, "permission backend ready");
    Ok(store)
}

pub fn settings_principals(config: &Config) -> HashMap<String, PrincipalSet> {
    config
        .authorization
        .settings_principals
        .iter()
        .map(|(setting, principals)| {
            (setting.clone(), principals.iter().cloned().collect())
        })
        .collect()
}

pub async fn build_engine(config: &Config) -> Result<RecordEngine> {
    let store = build_record_store(config).await?;
    let permissions = build_permission_store(config).await?;
    Ok(RecordEngine::new(store, permissions)
        .with_settings_principals(settings_principals(config)))
}
