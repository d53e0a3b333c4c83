//! # Silo Store - Storage Abstraction Layer
//!
//! Versioned CRUD over arbitrary JSON records, scoped by hierarchical
//! partitions and backed by pluggable storage implementations.
//!
//! Records live in partitions keyed by `(resource_name, parent_id)`. Every
//! write bumps a per-partition timestamp that is strictly increasing even
//! under concurrent writers, which is what sync clients rely on when
//! polling with `_since`. Deletions leave tombstones behind so that polls
//! can observe removals.

use async_trait::async_trait;
use silo_types::{Filter, ListQuery, Page, Record, StorageResult, Timestamp};

pub mod factory;
pub mod filtering;
pub mod generators;
pub mod memory;
pub mod pool;
mod versioning;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use factory::{BackendType, StorageConfig, StorageFactory};
pub use generators::{IdGenerator, NameGenerator, Uuid4Generator};
pub use memory::MemoryBackend;
pub use pool::{BoundedPool, Connect, PoolConfig, PooledConnection};

#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;

/// Partition used by [`heartbeat`] probes.
const HEARTBEAT_RESOURCE: &str = "__heartbeat__";

/// The abstract record store interface.
///
/// All operations are scoped by `resource_name` and `parent_id` unless
/// noted. Every method is a potential blocking point with no implicit
/// timeout; implementations own their timeout and retry policy. Reads may
/// be retried internally on transient faults, writes never are.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create every necessary object (tables, indices) in the backend.
    /// Idempotent; executed by the `silo migrate` command.
    async fn initialize_schema(&self) -> StorageResult<()>;

    /// Remove **every** record, tombstone and partition timestamp.
    async fn flush(&self) -> StorageResult<()>;

    /// Current partition timestamp: the highest `last_modified` of every
    /// record in the partition, tombstones included. A partition that was
    /// never written is initialized to "now".
    async fn resource_timestamp(
        &self,
        resource_name: &str,
        parent_id: &str,
    ) -> StorageResult<Timestamp>;

    /// Persist `record`, assigning an id (via the backend's generator)
    /// when absent and a fresh partition timestamp.
    ///
    /// Caller-supplied ids must satisfy the generator pattern. `id` plus
    /// each field named in `unique_fields` must not collide with a live
    /// record of the same partition.
    async fn create(
        &self,
        resource_name: &str,
        parent_id: &str,
        record: Record,
        unique_fields: &[&str],
    ) -> StorageResult<Record>;

    /// Retrieve a live record. Tombstoned or absent ids are `NotFound`.
    async fn get(&self, resource_name: &str, parent_id: &str, object_id: &str)
        -> StorageResult<Record>;

    /// Overwrite the record with the specified id, creating it when
    /// absent. Preserves `id`, bumps the partition timestamp.
    async fn update(
        &self,
        resource_name: &str,
        parent_id: &str,
        object_id: &str,
        record: Record,
    ) -> StorageResult<Record>;

    /// Replace a live record with a tombstone and bump the partition
    /// timestamp. `last_modified` optionally forces the tombstone version
    /// (still subject to the monotonic bump against the watermark).
    async fn delete(
        &self,
        resource_name: &str,
        parent_id: &str,
        object_id: &str,
        last_modified: Option<Timestamp>,
    ) -> StorageResult<Record>;

    /// Soft-delete every live record matching `filters`, returning the
    /// tombstones. `parent_id` may contain a `*` wildcard for
    /// administrative sweeps across partitions.
    async fn delete_all(
        &self,
        resource_name: &str,
        parent_id: &str,
        filters: &[Filter],
        limit: Option<usize>,
    ) -> StorageResult<Vec<Record>>;

    /// Hard-remove tombstones, optionally only those strictly older than
    /// `before`. Returns the number purged. `parent_id` may contain `*`.
    async fn purge_tombstones(
        &self,
        resource_name: &str,
        parent_id: &str,
        before: Option<Timestamp>,
    ) -> StorageResult<usize>;

    /// Retrieve an ordered page of records, tombstones included when
    /// `query.include_deleted` is set. `parent_id` may contain `*`.
    async fn list(
        &self,
        resource_name: &str,
        parent_id: &str,
        query: &ListQuery,
    ) -> StorageResult<Page>;

    /// Count live records matching `filters`.
    async fn count(
        &self,
        resource_name: &str,
        parent_id: &str,
        filters: &[Filter],
    ) -> StorageResult<usize>;
}

/// Probe that the store is operational by exercising a write and a purge
/// in a dedicated partition. Used by ops tooling.
pub async fn heartbeat(store: &dyn RecordStore) -> bool {
    let probe = async {
        store
            .create(HEARTBEAT_RESOURCE, HEARTBEAT_RESOURCE, Record::new(), &[])
            .await?;
        store
            .delete_all(HEARTBEAT_RESOURCE, HEARTBEAT_RESOURCE, &[], None)
            .await?;
        store
            .purge_tombstones(HEARTBEAT_RESOURCE, HEARTBEAT_RESOURCE, None)
            .await
    };
    match probe.await {
        Ok(_) => true,
        Err(err) => {
            tracing::error!(error = %err, "storage heartbeat failed");
            false
        }
    }
}
