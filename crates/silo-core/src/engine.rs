//! Composition of storage and permissions.
//!
//! Object URIs double as partition parents: a record of collection `c`
//! in bucket `b` lives in partition `("record", "/buckets/b/collections/c")`
//! and its own URI appends `/records/{id}`. The engine keeps the two
//! stores coherent: creation attaches ownership, deletion cascades to
//! descendant records and every affected ACL.

use std::collections::HashMap;
use std::sync::Arc;

use silo_permission::PermissionStore;
use silo_store::RecordStore;
use silo_types::{PermissionError, PrincipalSet, Record, StorageError};
use thiserror::Error;

use crate::authorization::{object_type, AuthorizationPolicy, ObjectType};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error("unknown object uri: {0:?}")]
    UnknownObject(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Storage and permissions behind one coherent surface.
pub struct RecordEngine {
    store: Arc<dyn RecordStore>,
    permissions: Arc<dyn PermissionStore>,
    policy: AuthorizationPolicy,
}

impl RecordEngine {
    pub fn new(store: Arc<dyn RecordStore>, permissions: Arc<dyn PermissionStore>) -> Self {
        let policy = AuthorizationPolicy::new(Arc::clone(&permissions));
        Self {
            store,
            permissions,
            policy,
        }
    }

    pub fn with_settings_principals(
        mut self,
        settings_principals: HashMap<String, PrincipalSet>,
    ) -> Self {
        self.policy = AuthorizationPolicy::new(Arc::clone(&self.permissions))
            .with_settings_principals(settings_principals);
        self
    }

    pub fn store(&self) -> &dyn RecordStore {
        &*self.store
    }

    pub fn permissions(&self) -> &dyn PermissionStore {
        &*self.permissions
    }

    pub fn policy(&self) -> &AuthorizationPolicy {
        &self.policy
    }

    /// Create an object under `parent_uri` and make `owner` its writer.
    pub async fn create_object(
        &self,
        resource_name: &str,
        parent_uri: &str,
        record: Record,
        owner: &str,
    ) -> EngineResult<Record> {
        let created = self
            .store
            .create(resource_name, parent_uri, record, &[])
            .await?;
        let id = created.id().unwrap_or_default();
        let object_uri = format!("{parent_uri}/{resource_name}s/{id}");
        self.permissions
            .add_principal_to_ace(&object_uri, "write", owner)
            .await?;
        Ok(created)
    }

    /// Tombstone an object and cascade: descendant records are
    /// tombstoned too, and every ACL at or below the object is dropped.
    /// Deleting a group also revokes it as a principal.
    pub async fn delete_object(&self, object_uri: &str) -> EngineResult<Record> {
        let kind = object_type(object_uri)
            .ok_or_else(|| EngineError::UnknownObject(object_uri.to_string()))?;
        let (parent_uri, object_id) = split_uri(object_uri)
            .ok_or_else(|| EngineError::UnknownObject(object_uri.to_string()))?;

        let tombstone = match kind {
            ObjectType::Record => {
                self.store
                    .delete("record", &parent_uri, &object_id, None)
                    .await?
            }
            ObjectType::Collection => {
                let tombstone = self
                    .store
                    .delete("collection", &parent_uri, &object_id, None)
                    .await?;
                let swept = self
                    .store
                    .delete_all("record", object_uri, &[], None)
                    .await?;
                tracing::info!(
                    collection = %object_uri,
                    records = swept.len(),
                    "collection cascade delete"
                );
                tombstone
            }
            ObjectType::Group => {
                let tombstone = self
                    .store
                    .delete("group", &parent_uri, &object_id, None)
                    .await?;
                // The group no longer grants anything to its members.
                self.permissions.remove_principal(object_uri).await?;
                tombstone
            }
            ObjectType::Bucket => {
                let tombstone = self.store.delete("bucket", "", &object_id, None).await?;
                self.store
                    .delete_all("collection", object_uri, &[], None)
                    .await?;
                // Cascade-deleted groups stop granting too, same as a
                // direct group delete.
                let groups = self.store.delete_all("group", object_uri, &[], None).await?;
                for group in &groups {
                    if let Some(id) = group.id() {
                        self.permissions
                            .remove_principal(&format!("{object_uri}/groups/{id}"))
                            .await?;
                    }
                }
                self.store
                    .delete_all("record", &format!("{object_uri}/collections/*"), &[], None)
                    .await?;
                tombstone
            }
        };

        self.permissions
            .delete_object_permissions(&[object_uri, &format!("{object_uri}/*")])
            .await?;
        Ok(tombstone)
    }
}

/// `/buckets/b/collections/c` -> (`/buckets/b`, `c`), with the plural
/// segment stripped from the parent so it matches the partition key.
fn split_uri(object_uri: &str) -> Option<(String, String)> {
    let (rest, id) = object_uri.rsplit_once('/')?;
    let (parent, _plural) = rest.rsplit_once('/')?;
    Some((parent.to_string(), id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_permission::MemoryPermissionBackend;
    use silo_store::MemoryBackend;
    use silo_test_fixtures::article;
    use silo_types::ListQuery;

    const BUCKET_URI: &str = "/buckets/blog";
    const COLLECTION_URI: &str = "/buckets/blog/collections/articles";

    fn engine() -> RecordEngine {
        RecordEngine::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryPermissionBackend::new()),
        )
    }

    #[tokio::test]
    async fn test_create_attaches_ownership() {
        let engine = engine();
        let created = engine
            .create_object("record", COLLECTION_URI, article("mine", 1), "alice")
            .await
            .unwrap();

        let object_uri = format!("{COLLECTION_URI}/records/{}", created.id().unwrap());
        let acl = engine
            .permissions()
            .get_object_permissions(&object_uri)
            .await
            .unwrap();
        assert!(acl["write"].contains("alice"));
    }

    #[tokio::test]
    async fn test_collection_delete_cascades_records_and_acls() {
        let engine = engine();
        engine
            .create_object("collection", BUCKET_URI, article("articles-meta", 0), "alice")
            .await
            .unwrap();
        let collection = engine
            .store()
            .list("collection", BUCKET_URI, &ListQuery::default())
            .await
            .unwrap()
            .records
            .remove(0);
        let collection_uri = format!("{BUCKET_URI}/collections/{}", collection.id().unwrap());

        let record = engine
            .create_object("record", &collection_uri, article("inside", 1), "bob")
            .await
            .unwrap();
        let record_uri = format!("{collection_uri}/records/{}", record.id().unwrap());

        let tombstone = engine.delete_object(&collection_uri).await.unwrap();
        assert!(tombstone.is_tombstone());

        // Records of the collection are tombstoned.
        let page = engine
            .store()
            .list(
                "record",
                &collection_uri,
                &ListQuery {
                    include_deleted: true,
                    ..ListQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 0);
        assert_eq!(page.records.len(), 1);
        assert!(page.records[0].is_tombstone());

        // Both the collection's and the record's ACLs are gone.
        assert!(engine
            .permissions()
            .get_object_permissions(&collection_uri)
            .await
            .unwrap()
            .is_empty());
        assert!(engine
            .permissions()
            .get_object_permissions(&record_uri)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_group_delete_revokes_the_principal() {
        let engine = engine();
        engine
            .create_object("group", BUCKET_URI, article("moderators-meta", 0), "alice")
            .await
            .unwrap();
        let group = engine
            .store()
            .list("group", BUCKET_URI, &ListQuery::default())
            .await
            .unwrap()
            .records
            .remove(0);
        let group_uri = format!("{BUCKET_URI}/groups/{}", group.id().unwrap());

        engine
            .permissions()
            .add_user_principal("bob", &group_uri)
            .await
            .unwrap();
        engine.delete_object(&group_uri).await.unwrap();

        let principals = engine.permissions().get_user_principals("bob").await.unwrap();
        assert!(!principals.contains(&group_uri));
    }

    #[tokio::test]
    async fn test_bucket_delete_revokes_cascaded_group_principals() {
        let engine = engine();
        let bucket = engine
            .create_object("bucket", "", article("blog-meta", 0), "alice")
            .await
            .unwrap();
        let bucket_uri = format!("/buckets/{}", bucket.id().unwrap());
        let group = engine
            .create_object("group", &bucket_uri, article("editors-meta", 0), "alice")
            .await
            .unwrap();
        let group_uri = format!("{bucket_uri}/groups/{}", group.id().unwrap());

        engine
            .permissions()
            .add_user_principal("bob", &group_uri)
            .await
            .unwrap();

        engine.delete_object(&bucket_uri).await.unwrap();

        // The group died with the bucket; bob no longer carries it.
        let principals = engine.permissions().get_user_principals("bob").await.unwrap();
        assert!(!principals.contains(&group_uri));
    }

    #[tokio::test]
    async fn test_unknown_uri_is_rejected() {
        let engine = engine();
        let result = engine.delete_object("/not/an/object").await;
        assert!(matches!(result, Err(EngineError::UnknownObject(_))));
    }
}
