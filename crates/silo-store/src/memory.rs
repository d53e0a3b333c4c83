//! In-memory storage backend for testing and development.
//!
//! Data is lost on restart. The partition timestamp discipline matches the
//! production backends: every write bumps the partition watermark to
//! `max(now, watermark + 1)`, so bursts faster than the clock resolution
//! still get distinct, strictly increasing versions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use silo_types::{
    Filter, ListQuery, Page, Record, StorageError, StorageResult, Timestamp,
};
use tokio::sync::RwLock;

use crate::filtering::{compare_values, extract_record_set, matches_all};
use crate::generators::{IdGenerator, Uuid4Generator};
use crate::versioning::bump_timestamp;
use crate::RecordStore;

/// Partition key: `(resource_name, parent_id)`.
type Partition = (String, String);

#[derive(Default)]
struct MemoryState {
    /// Live records, by partition then id.
    live: HashMap<Partition, BTreeMap<String, Record>>,
    /// Tombstones, by partition then id.
    cemetery: HashMap<Partition, BTreeMap<String, Record>>,
    /// Partition watermarks.
    timestamps: HashMap<Partition, Timestamp>,
}

impl MemoryState {
    fn bump_and_store(&mut self, partition: &Partition, explicit: Option<Timestamp>) -> Timestamp {
        let watermark = self
            .timestamps
            .get(partition)
            .copied()
            .unwrap_or_else(Timestamp::zero);
        let (assigned, watermark) = bump_timestamp(watermark, explicit);
        self.timestamps.insert(partition.clone(), watermark);
        assigned
    }

    /// Partitions of `map` matching `resource_name` and a parent id that
    /// may carry a `*` wildcard.
    fn matching_partitions<'a>(
        map: &'a HashMap<Partition, BTreeMap<String, Record>>,
        resource_name: &str,
        parent_id: &str,
    ) -> StorageResult<Vec<(&'a Partition, &'a BTreeMap<String, Record>)>> {
        if !parent_id.contains('*') {
            let key = (resource_name.to_string(), parent_id.to_string());
            return Ok(map.get_key_value(&key).into_iter().collect());
        }
        let pattern = format!("^{}$", regex::escape(parent_id).replace(r"\*", ".*"));
        let matcher = Regex::new(&pattern)
            .map_err(|err| StorageError::Backend(format!("invalid parent pattern: {err}")))?;
        Ok(map
            .iter()
            .filter(|((resource, parent), _)| resource == resource_name && matcher.is_match(parent))
            .collect())
    }
}

/// Storage backend implementation in local process memory.
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
    id_generator: Arc<dyn IdGenerator>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        // The default pattern is a constant; construction cannot fail.
        let generator =
            Uuid4Generator::new().expect("default uuid4 generator is self-consistent");
        Self::with_generator(Arc::new(generator))
    }

    pub fn with_generator(id_generator: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            id_generator,
        }
    }

    fn delete_locked(
        state: &mut MemoryState,
        partition: &Partition,
        object_id: &str,
        last_modified: Option<Timestamp>,
    ) -> StorageResult<Record> {
        let live = state
            .live
            .get_mut(partition)
            .ok_or_else(|| StorageError::NotFound(object_id.to_string()))?;
        live.remove(object_id)
            .ok_or_else(|| StorageError::NotFound(object_id.to_string()))?;

        let assigned = state.bump_and_store(partition, last_modified);
        let tombstone = Record::tombstone(object_id, assigned);
        state
            .cemetery
            .entry(partition.clone())
            .or_default()
            .insert(object_id.to_string(), tombstone.clone());
        Ok(tombstone)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryBackend {
    async fn initialize_schema(&self) -> StorageResult<()> {
        // Nothing to do.
        Ok(())
    }

    async fn flush(&self) -> StorageResult<()> {
        let mut state = self.state.write().await;
        *state = MemoryState::default();
        Ok(())
    }

    async fn resource_timestamp(
        &self,
        resource_name: &str,
        parent_id: &str,
    ) -> StorageResult<Timestamp> {
        let partition = (resource_name.to_string(), parent_id.to_string());
        let mut state = self.state.write().await;
        if let Some(timestamp) = state.timestamps.get(&partition) {
            return Ok(*timestamp);
        }
        Ok(state.bump_and_store(&partition, None))
    }

    async fn create(
        &self,
        resource_name: &str,
        parent_id: &str,
        mut record: Record,
        unique_fields: &[&str],
    ) -> StorageResult<Record> {
        let partition = (resource_name.to_string(), parent_id.to_string());
        let mut state = self.state.write().await;

        match record.id() {
            Some(id) => {
                if !self.id_generator.matches(id) {
                    return Err(StorageError::InvalidId(id.to_string()));
                }
                if let Some(existing) = state.live.get(&partition).and_then(|live| live.get(id)) {
                    return Err(StorageError::Unicity {
                        field: silo_types::ID_FIELD.to_string(),
                        record: existing.clone(),
                    });
                }
            }
            None => {
                let id = self.id_generator.generate();
                record.set_id(&id);
            }
        }

        if let Some(live) = state.live.get(&partition) {
            for field in unique_fields {
                let Some(value) = record.field(field) else {
                    continue;
                };
                if value.is_null() {
                    continue;
                }
                let collision = live.values().find(|existing| {
                    compare_values(existing.field(field), Some(value))
                        == std::cmp::Ordering::Equal
                });
                if let Some(existing) = collision {
                    return Err(StorageError::Unicity {
                        field: field.to_string(),
                        record: existing.clone(),
                    });
                }
            }
        }

        let explicit = record.last_modified();
        let assigned = state.bump_and_store(&partition, explicit);
        record.set_last_modified(assigned);

        let id = record.id().unwrap_or_default().to_string();
        state
            .live
            .entry(partition.clone())
            .or_default()
            .insert(id.clone(), record.clone());
        if let Some(cemetery) = state.cemetery.get_mut(&partition) {
            cemetery.remove(&id);
        }
        Ok(record)
    }

    async fn get(
        &self,
        resource_name: &str,
        parent_id: &str,
        object_id: &str,
    ) -> StorageResult<Record> {
        let partition = (resource_name.to_string(), parent_id.to_string());
        let state = self.state.read().await;
        state
            .live
            .get(&partition)
            .and_then(|live| live.get(object_id))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(object_id.to_string()))
    }

    async fn update(
        &self,
        resource_name: &str,
        parent_id: &str,
        object_id: &str,
        mut record: Record,
    ) -> StorageResult<Record> {
        let partition = (resource_name.to_string(), parent_id.to_string());
        let mut state = self.state.write().await;

        record.set_id(object_id);
        let explicit = record.last_modified();
        let assigned = state.bump_and_store(&partition, explicit);
        record.set_last_modified(assigned);

        state
            .live
            .entry(partition.clone())
            .or_default()
            .insert(object_id.to_string(), record.clone());
        if let Some(cemetery) = state.cemetery.get_mut(&partition) {
            cemetery.remove(object_id);
        }
        Ok(record)
    }

    async fn delete(
        &self,
        resource_name: &str,
        parent_id: &str,
        object_id: &str,
        last_modified: Option<Timestamp>,
    ) -> StorageResult<Record> {
        let partition = (resource_name.to_string(), parent_id.to_string());
        let mut state = self.state.write().await;
        Self::delete_locked(&mut state, &partition, object_id, last_modified)
    }

    async fn delete_all(
        &self,
        resource_name: &str,
        parent_id: &str,
        filters: &[Filter],
        limit: Option<usize>,
    ) -> StorageResult<Vec<Record>> {
        let mut state = self.state.write().await;

        let mut targets: Vec<(Partition, String)> = Vec::new();
        for (partition, live) in
            MemoryState::matching_partitions(&state.live, resource_name, parent_id)?
        {
            for record in live.values() {
                if matches_all(record, filters) {
                    if let Some(id) = record.id() {
                        targets.push((partition.clone(), id.to_string()));
                    }
                }
            }
        }
        if let Some(limit) = limit {
            targets.truncate(limit);
        }

        let mut tombstones = Vec::with_capacity(targets.len());
        for (partition, id) in targets {
            tombstones.push(Self::delete_locked(&mut state, &partition, &id, None)?);
        }
        Ok(tombstones)
    }

    async fn purge_tombstones(
        &self,
        resource_name: &str,
        parent_id: &str,
        before: Option<Timestamp>,
    ) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let partitions: Vec<Partition> =
            MemoryState::matching_partitions(&state.cemetery, resource_name, parent_id)?
                .into_iter()
                .map(|(partition, _)| partition.clone())
                .collect();

        let mut purged = 0;
        for partition in partitions {
            if let Some(cemetery) = state.cemetery.get_mut(&partition) {
                let len_before = cemetery.len();
                match before {
                    // The bound is exclusive: tombstones at `before` are kept.
                    Some(before) => cemetery
                        .retain(|_, tombstone| tombstone.last_modified() >= Some(before)),
                    None => cemetery.clear(),
                }
                purged += len_before - cemetery.len();
            }
        }
        Ok(purged)
    }

    async fn list(
        &self,
        resource_name: &str,
        parent_id: &str,
        query: &ListQuery,
    ) -> StorageResult<Page> {
        let state = self.state.read().await;
        let mut records: Vec<Record> =
            MemoryState::matching_partitions(&state.live, resource_name, parent_id)?
                .into_iter()
                .flat_map(|(_, live)| live.values().cloned())
                .collect();
        if query.include_deleted {
            records.extend(
                MemoryState::matching_partitions(&state.cemetery, resource_name, parent_id)?
                    .into_iter()
                    .flat_map(|(_, cemetery)| cemetery.values().cloned()),
            );
        }
        let (records, total) = extract_record_set(
            records,
            &query.filters,
            &query.sorting,
            &query.pagination_rules,
            query.limit,
        );
        Ok(Page { records, total })
    }

    async fn count(
        &self,
        resource_name: &str,
        parent_id: &str,
        filters: &[Filter],
    ) -> StorageResult<usize> {
        let state = self.state.read().await;
        let count = MemoryState::matching_partitions(&state.live, resource_name, parent_id)?
            .into_iter()
            .flat_map(|(_, live)| live.values())
            .filter(|record| matches_all(record, filters))
            .count();
        Ok(count)
    }
}
