//! PostgreSQL storage backend.
//!
//! One `objects` table holds records and tombstones, one `timestamps`
//! table holds the per-partition watermark. Every write runs in a
//! transaction that locks the partition's watermark row, so concurrent
//! writers serialize on the bump and versions never collide.
//!
//! Pool acquisition goes through a backlog-bounded semaphore: once every
//! connection is handed out and `max_backlog` callers are already
//! waiting, further acquisitions fail immediately instead of queueing.

use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Transaction};
use serde_json::{Map, Value};
use silo_types::{
    ComparisonOperator, Filter, ListQuery, Page, Record, SortDirection, StorageError,
    StorageResult, Timestamp, DELETED_FIELD, ID_FIELD, MODIFIED_FIELD,
};
use tokio::sync::Semaphore;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use crate::generators::IdGenerator;
use crate::pool::PoolConfig;
use crate::versioning::bump_timestamp;
use crate::RecordStore;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS objects (
    id TEXT NOT NULL,
    parent_id TEXT NOT NULL,
    resource_name TEXT NOT NULL,
    last_modified BIGINT NOT NULL,
    data JSONB NOT NULL DEFAULT '{}'::JSONB,
    deleted BOOLEAN NOT NULL DEFAULT FALSE,
    PRIMARY KEY (id, parent_id, resource_name)
);
CREATE INDEX IF NOT EXISTS idx_objects_partition_last_modified
    ON objects (parent_id, resource_name, last_modified DESC);
CREATE TABLE IF NOT EXISTS timestamps (
    parent_id TEXT NOT NULL,
    resource_name TEXT NOT NULL,
    last_modified BIGINT NOT NULL,
    PRIMARY KEY (parent_id, resource_name)
);
"#;

type Param = Box<dyn ToSql + Sync + Send>;

fn pg_err(err: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(err.to_string())
}

/// Split a record into its JSONB payload, stripping system columns.
fn payload(record: &Record) -> Value {
    let mut data = record.0.clone();
    data.remove(ID_FIELD);
    data.remove(MODIFIED_FIELD);
    data.remove(DELETED_FIELD);
    Value::Object(data)
}

fn assemble(id: &str, last_modified: i64, deleted: bool, data: Value) -> Record {
    if deleted {
        return Record::tombstone(id, Timestamp(last_modified));
    }
    let mut fields = match data {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    fields.insert(MODIFIED_FIELD.to_string(), Value::from(last_modified));
    Record(fields)
}

/// Dynamic WHERE/ORDER builder. Parameters are numbered from `$1`.
struct SqlBuilder {
    clauses: Vec<String>,
    params: Vec<Param>,
}

impl SqlBuilder {
    fn new() -> Self {
        Self {
            clauses: Vec::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, param: Param) -> usize {
        self.params.push(param);
        self.params.len()
    }

    fn push_clause(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    /// `parent_id = $n`, or `parent_id LIKE $n` for wildcard patterns.
    fn parent_clause(&mut self, parent_id: &str) {
        if parent_id.contains('*') {
            let pattern = parent_id.replace('%', r"\%").replace('_', r"\_").replace('*', "%");
            let n = self.push_param(Box::new(pattern));
            self.push_clause(format!("parent_id LIKE ${n}"));
        } else {
            let n = self.push_param(Box::new(parent_id.to_string()));
            self.push_clause(format!("parent_id = ${n}"));
        }
    }

    fn json_path(&mut self, field: &str) -> String {
        let path: Vec<String> = field.split('.').map(str::to_string).collect();
        let n = self.push_param(Box::new(path));
        format!("(data #> ${n}::text[])")
    }

    fn filter_clause(&mut self, filter: &Filter) -> StorageResult<()> {
        // System columns compare natively, everything else as jsonb.
        let clause = if filter.field == MODIFIED_FIELD {
            let value = filter.value.as_i64().ok_or_else(|| {
                StorageError::Backend(format!(
                    "filter on {MODIFIED_FIELD} requires an integer, got {}",
                    filter.value
                ))
            })?;
            let n = self.push_param(Box::new(value));
            let op = comparison_sql(filter.operator)?;
            format!("last_modified {op} ${n}")
        } else if filter.field == ID_FIELD {
            let value = filter
                .value
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| filter.value.to_string());
            let n = self.push_param(Box::new(value));
            let op = comparison_sql(filter.operator)?;
            format!("id {op} ${n}")
        } else {
            match filter.operator {
                ComparisonOperator::In => {
                    let lhs = self.json_path(&filter.field);
                    let n = self.push_param(Box::new(filter.value.clone()));
                    format!("{lhs} IN (SELECT jsonb_array_elements(${n}))")
                }
                ComparisonOperator::Exclude => {
                    let lhs = self.json_path(&filter.field);
                    let n = self.push_param(Box::new(filter.value.clone()));
                    format!(
                        "({lhs} IS NULL OR {lhs} NOT IN (SELECT jsonb_array_elements(${n})))"
                    )
                }
                ComparisonOperator::Like => {
                    let lhs = self.json_path(&filter.field);
                    let raw = filter.value.as_str().unwrap_or_default();
                    let pattern = if raw.contains('*') {
                        raw.replace('%', r"\%").replace('_', r"\_").replace('*', "%")
                    } else {
                        format!("%{}%", raw.replace('%', r"\%").replace('_', r"\_"))
                    };
                    let n = self.push_param(Box::new(pattern));
                    format!("({lhs} #>> '{{}}') ILIKE ${n}")
                }
                ComparisonOperator::Has => {
                    let lhs = self.json_path(&filter.field);
                    if filter.value.as_bool().unwrap_or(true) {
                        format!("{lhs} IS NOT NULL")
                    } else {
                        format!("{lhs} IS NULL")
                    }
                }
                _ => {
                    let lhs = self.json_path(&filter.field);
                    let n = self.push_param(Box::new(filter.value.clone()));
                    let op = comparison_sql(filter.operator)?;
                    format!("{lhs} {op} ${n}")
                }
            }
        };
        self.push_clause(clause);
        Ok(())
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            "TRUE".to_string()
        } else {
            self.clauses.join(" AND ")
        }
    }

    fn as_params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|param| param.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }
}

fn comparison_sql(operator: ComparisonOperator) -> StorageResult<&'static str> {
    match operator {
        ComparisonOperator::Eq => Ok("="),
        ComparisonOperator::Not => Ok("IS DISTINCT FROM"),
        ComparisonOperator::Lt => Ok("<"),
        ComparisonOperator::Gt => Ok(">"),
        ComparisonOperator::Min => Ok(">="),
        ComparisonOperator::Max => Ok("<="),
        other => Err(StorageError::Backend(format!(
            "operator {other:?} has no direct SQL comparison"
        ))),
    }
}

/// A pooled connection that keeps its backlog slot occupied until drop.
struct PooledClient {
    client: deadpool_postgres::Object,
    _slot: tokio::sync::OwnedSemaphorePermit,
}

impl std::ops::Deref for PooledClient {
    type Target = deadpool_postgres::Object;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl std::ops::DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.client
    }
}

/// PostgreSQL implementation of [`RecordStore`].
pub struct PostgresBackend {
    pool: Pool,
    /// Holders plus waiters; see [`crate::pool`] for the rationale.
    slots: Arc<Semaphore>,
    wait_timeout: std::time::Duration,
    id_generator: Arc<dyn IdGenerator>,
}

impl PostgresBackend {
    pub async fn connect(
        connection_string: &str,
        pool_config: PoolConfig,
        id_generator: Arc<dyn IdGenerator>,
    ) -> StorageResult<Self> {
        let pg_config: tokio_postgres::Config = connection_string.parse().map_err(pg_err)?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(pool_config.max_size)
            .build()
            .map_err(pg_err)?;
        Ok(Self {
            pool,
            slots: Arc::new(Semaphore::new(pool_config.max_size + pool_config.max_backlog)),
            wait_timeout: pool_config.wait_timeout,
            id_generator,
        })
    }

    async fn client(&self) -> StorageResult<PooledClient> {
        let slot = Arc::clone(&self.slots).try_acquire_owned().map_err(|_| {
            StorageError::Backend("connection backlog exhausted".to_string())
        })?;
        let client = tokio::time::timeout(self.wait_timeout, self.pool.get())
            .await
            .map_err(|_| StorageError::Backend("timed out waiting for a connection".to_string()))?
            .map_err(pg_err)?;
        Ok(PooledClient {
            client,
            _slot: slot,
        })
    }

    /// Bump the partition watermark under a row lock and return the
    /// version assigned to the current write.
    async fn bump(
        tx: &Transaction<'_>,
        resource_name: &str,
        parent_id: &str,
        explicit: Option<Timestamp>,
    ) -> StorageResult<Timestamp> {
        let row = tx
            .query_opt(
                "SELECT last_modified FROM timestamps \
                 WHERE parent_id = $1 AND resource_name = $2 FOR UPDATE",
                &[&parent_id, &resource_name],
            )
            .await
            .map_err(pg_err)?;
        let watermark = row
            .map(|row| Timestamp(row.get::<_, i64>(0)))
            .unwrap_or_else(Timestamp::zero);
        let (assigned, watermark) = bump_timestamp(watermark, explicit);
        tx.execute(
            "INSERT INTO timestamps (parent_id, resource_name, last_modified) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (parent_id, resource_name) \
             DO UPDATE SET last_modified = EXCLUDED.last_modified",
            &[&parent_id, &resource_name, &watermark.0],
        )
        .await
        .map_err(pg_err)?;
        Ok(assigned)
    }

    /// WHERE clauses counting live records: partition, no tombstones,
    /// the caller's filters. Shared by `count` and `list` so both report
    /// the same total.
    fn count_builder(
        resource_name: &str,
        parent_id: &str,
        filters: &[Filter],
    ) -> StorageResult<SqlBuilder> {
        let mut builder = SqlBuilder::new();
        let n = builder.push_param(Box::new(resource_name.to_string()));
        builder.push_clause(format!("resource_name = ${n}"));
        builder.parent_clause(parent_id);
        builder.push_clause("NOT deleted".to_string());
        for filter in filters {
            builder.filter_clause(filter)?;
        }
        Ok(builder)
    }

    async fn upsert(
        tx: &Transaction<'_>,
        resource_name: &str,
        parent_id: &str,
        id: &str,
        last_modified: Timestamp,
        data: &Value,
    ) -> StorageResult<()> {
        tx.execute(
            "INSERT INTO objects (id, parent_id, resource_name, last_modified, data, deleted) \
             VALUES ($1, $2, $3, $4, $5, FALSE) \
             ON CONFLICT (id, parent_id, resource_name) \
             DO UPDATE SET last_modified = EXCLUDED.last_modified, \
                           data = EXCLUDED.data, deleted = FALSE",
            &[&id, &parent_id, &resource_name, &last_modified.0, data],
        )
        .await
        .map_err(pg_err)?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PostgresBackend {
    async fn initialize_schema(&self) -> StorageResult<()> {
        let client = self.client().await?;
        client.batch_execute(SCHEMA_SQL).await.map_err(pg_err)?;
        tracing::info!("postgresql storage schema initialized");
        Ok(())
    }

    async fn flush(&self) -> StorageResult<()> {
        let client = self.client().await?;
        client
            .batch_execute("TRUNCATE objects, timestamps;")
            .await
            .map_err(pg_err)
    }

    async fn resource_timestamp(
        &self,
        resource_name: &str,
        parent_id: &str,
    ) -> StorageResult<Timestamp> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(pg_err)?;
        let row = tx
            .query_opt(
                "SELECT last_modified FROM timestamps \
                 WHERE parent_id = $1 AND resource_name = $2",
                &[&parent_id, &resource_name],
            )
            .await
            .map_err(pg_err)?;
        let timestamp = match row {
            Some(row) => Timestamp(row.get::<_, i64>(0)),
            None => Self::bump(&tx, resource_name, parent_id, None).await?,
        };
        tx.commit().await.map_err(pg_err)?;
        Ok(timestamp)
    }

    async fn create(
        &self,
        resource_name: &str,
        parent_id: &str,
        mut record: Record,
        unique_fields: &[&str],
    ) -> StorageResult<Record> {
        match record.id() {
            Some(id) => {
                if !self.id_generator.matches(id) {
                    return Err(StorageError::InvalidId(id.to_string()));
                }
            }
            None => {
                let id = self.id_generator.generate();
                record.set_id(&id);
            }
        }
        let id = record.id().unwrap_or_default().to_string();

        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(pg_err)?;

        let existing = tx
            .query_opt(
                "SELECT last_modified, data FROM objects \
                 WHERE id = $1 AND parent_id = $2 AND resource_name = $3 AND NOT deleted",
                &[&id, &parent_id, &resource_name],
            )
            .await
            .map_err(pg_err)?;
        if let Some(row) = existing {
            return Err(StorageError::Unicity {
                field: ID_FIELD.to_string(),
                record: assemble(&id, row.get(0), false, row.get(1)),
            });
        }

        for field in unique_fields {
            let Some(value) = record.field(field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let mut builder = SqlBuilder::new();
            builder.push_clause("parent_id = $1".to_string());
            builder.push_clause("resource_name = $2".to_string());
            builder.push_clause("NOT deleted".to_string());
            builder.params.push(Box::new(parent_id.to_string()));
            builder.params.push(Box::new(resource_name.to_string()));
            builder.filter_clause(&Filter::eq(*field, value.clone()))?;
            let sql = format!(
                "SELECT id, last_modified, data FROM objects WHERE {} LIMIT 1",
                builder.where_sql()
            );
            let row = tx
                .query_opt(&sql, &builder.as_params())
                .await
                .map_err(pg_err)?;
            if let Some(row) = row {
                return Err(StorageError::Unicity {
                    field: field.to_string(),
                    record: assemble(row.get(0), row.get(1), false, row.get(2)),
                });
            }
        }

        let explicit = record.last_modified();
        let assigned = Self::bump(&tx, resource_name, parent_id, explicit).await?;
        record.set_last_modified(assigned);
        Self::upsert(&tx, resource_name, parent_id, &id, assigned, &payload(&record)).await?;
        tx.commit().await.map_err(pg_err)?;
        Ok(record)
    }

    async fn get(
        &self,
        resource_name: &str,
        parent_id: &str,
        object_id: &str,
    ) -> StorageResult<Record> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT last_modified, data FROM objects \
                 WHERE id = $1 AND parent_id = $2 AND resource_name = $3 AND NOT deleted",
                &[&object_id, &parent_id, &resource_name],
            )
            .await
            .map_err(pg_err)?
            .ok_or_else(|| StorageError::NotFound(object_id.to_string()))?;
        Ok(assemble(object_id, row.get(0), false, row.get(1)))
    }

    async fn update(
        &self,
        resource_name: &str,
        parent_id: &str,
        object_id: &str,
        mut record: Record,
    ) -> StorageResult<Record> {
        record.set_id(object_id);
        let explicit = record.last_modified();

        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(pg_err)?;
        let assigned = Self::bump(&tx, resource_name, parent_id, explicit).await?;
        record.set_last_modified(assigned);
        Self::upsert(&tx, resource_name, parent_id, object_id, assigned, &payload(&record))
            .await?;
        tx.commit().await.map_err(pg_err)?;
        Ok(record)
    }

    async fn delete(
        &self,
        resource_name: &str,
        parent_id: &str,
        object_id: &str,
        last_modified: Option<Timestamp>,
    ) -> StorageResult<Record> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(pg_err)?;
        let live = tx
            .query_opt(
                "SELECT 1 FROM objects \
                 WHERE id = $1 AND parent_id = $2 AND resource_name = $3 AND NOT deleted \
                 FOR UPDATE",
                &[&object_id, &parent_id, &resource_name],
            )
            .await
            .map_err(pg_err)?;
        if live.is_none() {
            return Err(StorageError::NotFound(object_id.to_string()));
        }
        let assigned = Self::bump(&tx, resource_name, parent_id, last_modified).await?;
        tx.execute(
            "UPDATE objects SET deleted = TRUE, data = '{}'::JSONB, last_modified = $4 \
             WHERE id = $1 AND parent_id = $2 AND resource_name = $3",
            &[&object_id, &parent_id, &resource_name, &assigned.0],
        )
        .await
        .map_err(pg_err)?;
        tx.commit().await.map_err(pg_err)?;
        Ok(Record::tombstone(object_id, assigned))
    }

    async fn delete_all(
        &self,
        resource_name: &str,
        parent_id: &str,
        filters: &[Filter],
        limit: Option<usize>,
    ) -> StorageResult<Vec<Record>> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(pg_err)?;

        let mut builder = SqlBuilder::new();
        let n = builder.push_param(Box::new(resource_name.to_string()));
        builder.push_clause(format!("resource_name = ${n}"));
        builder.parent_clause(parent_id);
        builder.push_clause("NOT deleted".to_string());
        for filter in filters {
            builder.filter_clause(filter)?;
        }
        let mut sql = format!(
            "SELECT id, parent_id FROM objects WHERE {} FOR UPDATE",
            builder.where_sql()
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let rows = tx.query(&sql, &builder.as_params()).await.map_err(pg_err)?;

        let mut tombstones = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get(0);
            let parent: String = row.get(1);
            let assigned = Self::bump(&tx, resource_name, &parent, None).await?;
            tx.execute(
                "UPDATE objects SET deleted = TRUE, data = '{}'::JSONB, last_modified = $4 \
                 WHERE id = $1 AND parent_id = $2 AND resource_name = $3",
                &[&id, &parent, &resource_name, &assigned.0],
            )
            .await
            .map_err(pg_err)?;
            tombstones.push(Record::tombstone(&id, assigned));
        }
        tx.commit().await.map_err(pg_err)?;
        Ok(tombstones)
    }

    async fn purge_tombstones(
        &self,
        resource_name: &str,
        parent_id: &str,
        before: Option<Timestamp>,
    ) -> StorageResult<usize> {
        let client = self.client().await?;
        let mut builder = SqlBuilder::new();
        let n = builder.push_param(Box::new(resource_name.to_string()));
        builder.push_clause(format!("resource_name = ${n}"));
        builder.parent_clause(parent_id);
        builder.push_clause("deleted".to_string());
        if let Some(before) = before {
            let n = builder.push_param(Box::new(before.0));
            builder.push_clause(format!("last_modified < ${n}"));
        }
        let sql = format!("DELETE FROM objects WHERE {}", builder.where_sql());
        let purged = client
            .execute(&sql, &builder.as_params())
            .await
            .map_err(pg_err)?;
        Ok(purged as usize)
    }

    async fn list(
        &self,
        resource_name: &str,
        parent_id: &str,
        query: &ListQuery,
    ) -> StorageResult<Page> {
        let mut client = self.client().await?;
        // Page and total share one transaction on one connection: a list
        // call never waits on a second pool slot, and the total matches
        // the page's snapshot.
        let tx = client.transaction().await.map_err(pg_err)?;

        let mut builder = SqlBuilder::new();
        let n = builder.push_param(Box::new(resource_name.to_string()));
        builder.push_clause(format!("resource_name = ${n}"));
        builder.parent_clause(parent_id);
        if !query.include_deleted {
            builder.push_clause("NOT deleted".to_string());
        }
        for filter in &query.filters {
            builder.filter_clause(filter)?;
        }

        if !query.pagination_rules.is_empty() {
            let mut groups = Vec::with_capacity(query.pagination_rules.len());
            for rule in &query.pagination_rules {
                let mut group = SqlBuilder {
                    clauses: Vec::new(),
                    params: std::mem::take(&mut builder.params),
                };
                for filter in rule {
                    group.filter_clause(filter)?;
                }
                builder.params = group.params;
                groups.push(format!("({})", group.where_sql()));
            }
            builder.push_clause(format!("({})", groups.join(" OR ")));
        }

        let mut order = Vec::with_capacity(query.sorting.len().max(1));
        for sort in &query.sorting {
            let direction = match sort.direction {
                SortDirection::Ascending => "ASC NULLS LAST",
                SortDirection::Descending => "DESC NULLS FIRST",
            };
            let expr = if sort.field == MODIFIED_FIELD {
                "last_modified".to_string()
            } else if sort.field == ID_FIELD {
                "id".to_string()
            } else {
                builder.json_path(&sort.field)
            };
            order.push(format!("{expr} {direction}"));
        }
        if order.is_empty() {
            order.push("last_modified DESC".to_string());
        }

        let mut sql = format!(
            "SELECT id, last_modified, deleted, data FROM objects WHERE {} ORDER BY {}",
            builder.where_sql(),
            order.join(", ")
        );
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let rows = tx.query(&sql, &builder.as_params()).await.map_err(pg_err)?;
        let records = rows
            .iter()
            .map(|row| {
                let id: String = row.get(0);
                assemble(&id, row.get(1), row.get(2), row.get(3))
            })
            .collect();

        let counter = Self::count_builder(resource_name, parent_id, &query.filters)?;
        let count_sql = format!("SELECT COUNT(*) FROM objects WHERE {}", counter.where_sql());
        let row = tx
            .query_one(&count_sql, &counter.as_params())
            .await
            .map_err(pg_err)?;
        let total = row.get::<_, i64>(0) as usize;
        tx.commit().await.map_err(pg_err)?;
        Ok(Page { records, total })
    }

    async fn count(
        &self,
        resource_name: &str,
        parent_id: &str,
        filters: &[Filter],
    ) -> StorageResult<usize> {
        let client = self.client().await?;
        let builder = Self::count_builder(resource_name, parent_id, filters)?;
        let sql = format!("SELECT COUNT(*) FROM objects WHERE {}", builder.where_sql());
        let row = client
            .query_one(&sql, &builder.as_params())
            .await
            .map_err(pg_err)?;
        Ok(row.get::<_, i64>(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_strips_system_fields() {
        let record: Record =
            serde_json::from_value(json!({"id": "x", "last_modified": 5, "title": "t"})).unwrap();
        let data = payload(&record);
        assert_eq!(data, json!({"title": "t"}));
    }

    #[test]
    fn test_assemble_round_trips_live_record() {
        let record = assemble("x", 5, false, json!({"title": "t"}));
        assert_eq!(record.id(), Some("x"));
        assert_eq!(record.last_modified(), Some(Timestamp(5)));
        assert!(!record.is_tombstone());
    }

    #[test]
    fn test_assemble_tombstone_drops_payload() {
        let record = assemble("x", 5, true, json!({"title": "t"}));
        assert!(record.is_tombstone());
        assert_eq!(record.field("title"), None);
    }

    #[test]
    fn test_sql_builder_numbers_parameters() {
        let mut builder = SqlBuilder::new();
        builder.parent_clause("/buckets/blog");
        builder
            .filter_clause(&Filter::gt(MODIFIED_FIELD, 42))
            .unwrap();
        assert_eq!(builder.where_sql(), "parent_id = $1 AND last_modified > $2");
        assert_eq!(builder.params.len(), 2);
    }

    #[test]
    fn test_sql_builder_wildcard_parent_uses_like() {
        let mut builder = SqlBuilder::new();
        builder.parent_clause("/buckets/blog/collections/*");
        assert_eq!(builder.where_sql(), "parent_id LIKE $1");
    }

    #[test]
    fn test_count_builder_counts_live_partition_matches() {
        let builder = PostgresBackend::count_builder(
            "record",
            "/buckets/blog",
            &[Filter::gt(MODIFIED_FIELD, 7)],
        )
        .unwrap();
        // The same predicate backs both `count` and the total of `list`;
        // tombstones and pagination rules never leak into it.
        assert_eq!(
            builder.where_sql(),
            "resource_name = $1 AND parent_id = $2 AND NOT deleted AND last_modified > $3"
        );
    }
}
