//! Object-level ACL authorization with top-down inheritance.
//!
//! Object ids follow the grammar
//! `/buckets/{b}[/groups/{g} | /collections/{c}[/records/{r}]]`, with
//! plural forms (`/buckets`, `.../records`) naming the endpoints that
//! list or create children. A permission required on an object may be
//! satisfied by grants held on any of its ancestors: `write` on a bucket
//! carries `write` and `read` down to every record beneath it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use silo_permission::PermissionStore;
use silo_types::{BoundPermission, Decision, PermissionResult, PrincipalSet};

/// Object classes of the id grammar, from the hierarchy root down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Bucket,
    Group,
    Collection,
    Record,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Bucket => "bucket",
            ObjectType::Group => "group",
            ObjectType::Collection => "collection",
            ObjectType::Record => "record",
        }
    }

    /// Number of `/`-separated parts in the object's URI, counting the
    /// leading empty part (`/buckets/b` splits into 3).
    fn parts_length(&self) -> usize {
        match self {
            ObjectType::Bucket => 3,
            ObjectType::Group | ObjectType::Collection => 5,
            ObjectType::Record => 7,
        }
    }
}

/// Classify an object URI. Plural child endpoints classify as the object
/// that owns them (`/buckets/b/collections` is a facet of the bucket),
/// unknown URIs are `None`.
pub fn object_type(object_uri: &str) -> Option<ObjectType> {
    let parts: Vec<&str> = object_uri.split('/').collect();
    if parts.first() != Some(&"") || parts.get(1) != Some(&"buckets") {
        return None;
    }
    let nonempty = |i: usize| parts.get(i).is_some_and(|p| !p.is_empty());
    if !nonempty(2) {
        return None;
    }
    match (parts.get(3).copied(), nonempty(4), nonempty(6)) {
        (None, _, _) => Some(ObjectType::Bucket),
        // `/buckets/b/collections` and `/buckets/b/groups` act on the bucket.
        (Some("collections"), false, _) | (Some("groups"), false, _) => Some(ObjectType::Bucket),
        (Some("groups"), true, _) if parts.len() == 5 => Some(ObjectType::Group),
        (Some("collections"), true, _) => match parts.get(5).copied() {
            None => Some(ObjectType::Collection),
            // `/buckets/b/collections/c/records` acts on the collection.
            Some("records") if !nonempty(6) => Some(ObjectType::Collection),
            Some("records") if parts.len() == 7 => Some(ObjectType::Record),
            _ => None,
        },
        _ => None,
    }
}

/// Truncate `parts` to the ancestor of the given type and bind the
/// permission to it. `None` when the URI is too shallow.
pub fn build_permission_tuple(
    object_type: ObjectType,
    permission: &str,
    parts: &[&str],
) -> Option<BoundPermission> {
    let length = object_type.parts_length();
    if parts.len() < length {
        return None;
    }
    Some(BoundPermission::new(parts[..length].join("/"), permission))
}

/// Which ancestor grants satisfy `permission` on an object of this type.
fn inherited_grants(
    object_type: ObjectType,
    permission: &str,
) -> Vec<(ObjectType, &'static str)> {
    use ObjectType::{Bucket, Collection, Group, Record};
    match (object_type, permission) {
        (Bucket, "write") => vec![(Bucket, "write")],
        (Bucket, "read") => vec![(Bucket, "write"), (Bucket, "read")],
        (Bucket, "group:create") => vec![(Bucket, "write"), (Bucket, "group:create")],
        (Bucket, "collection:create") => {
            vec![(Bucket, "write"), (Bucket, "collection:create")]
        }
        (Group, "write") => vec![(Bucket, "write"), (Group, "write")],
        (Group, "read") => vec![
            (Bucket, "write"),
            (Bucket, "read"),
            (Group, "write"),
            (Group, "read"),
        ],
        (Collection, "write") => vec![(Bucket, "write"), (Collection, "write")],
        (Collection, "read") => vec![
            (Bucket, "write"),
            (Bucket, "read"),
            (Collection, "write"),
            (Collection, "read"),
        ],
        (Collection, "record:create") => vec![
            (Bucket, "write"),
            (Collection, "write"),
            (Collection, "record:create"),
        ],
        (Record, "write") => vec![(Bucket, "write"), (Collection, "write"), (Record, "write")],
        (Record, "read") => vec![
            (Bucket, "write"),
            (Bucket, "read"),
            (Collection, "write"),
            (Collection, "read"),
            (Record, "write"),
            (Record, "read"),
        ],
        _ => vec![],
    }
}

/// Every `(ancestor object id, permission)` grant that satisfies
/// `permission` on `object_uri`. Empty for unknown URIs or permissions.
pub fn build_permissions_set(object_uri: &str, permission: &str) -> HashSet<BoundPermission> {
    let Some(kind) = object_type(object_uri) else {
        return HashSet::new();
    };
    let parts: Vec<&str> = object_uri.split('/').collect();
    inherited_grants(kind, permission)
        .into_iter()
        .filter_map(|(granted_on, granted)| build_permission_tuple(granted_on, granted, &parts))
        .collect()
}

/// The singular resource a plural endpoint lists or creates
/// (`.../records` -> `record`). For an object URI, its own type.
pub fn resource_name(object_uri: &str) -> Option<&'static str> {
    match object_uri.rsplit('/').next() {
        Some("buckets") => Some("bucket"),
        Some("groups") => Some("group"),
        Some("collections") => Some("collection"),
        Some("records") => Some("record"),
        _ => object_type(object_uri).map(|kind| kind.as_str()),
    }
}

fn parent_uri(object_uri: &str) -> Option<&str> {
    object_uri.rfind('/').map(|i| &object_uri[..i])
}

/// One authorization question.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Effective principals of the caller, group expansion already done
    /// (see `PermissionStore::get_user_principals`), including
    /// `system.Everyone` and, when logged in, `system.Authenticated`.
    pub principals: PrincipalSet,
    /// Target object URI; the plural endpoint URI for list/create.
    pub object_id: String,
    /// Required permission: `read`, `write` or `create`.
    pub permission: String,
    /// True when the request addresses a plural endpoint.
    pub on_plural_endpoint: bool,
    /// Whether the target object currently exists in storage. Affects
    /// both the write-on-missing relaxation and denial presentation.
    pub object_exists: bool,
}

/// Decides requests against the permission store, the inheritance tree
/// and the statically configured principals.
pub struct AuthorizationPolicy {
    permissions: Arc<dyn PermissionStore>,
    /// Setting name (`record_create`, `bucket_write`, ...) to principals
    /// allowed by configuration regardless of ACLs.
    settings_principals: HashMap<String, PrincipalSet>,
}

impl AuthorizationPolicy {
    pub fn new(permissions: Arc<dyn PermissionStore>) -> Self {
        Self {
            permissions,
            settings_principals: HashMap::new(),
        }
    }

    pub fn with_settings_principals(
        mut self,
        settings_principals: HashMap<String, PrincipalSet>,
    ) -> Self {
        self.settings_principals = settings_principals;
        self
    }

    /// Decide one request. Denial is a value carrying its presentation:
    /// `Forbidden` when the caller can read the parent (the object's
    /// existence is no secret), `NotVisible` otherwise. Root plural
    /// endpoints always present `Forbidden`.
    pub async fn check(&self, request: &AuthorizationRequest) -> PermissionResult<Decision> {
        let resource = resource_name(&request.object_id).unwrap_or("unknown");
        let effective = if request.permission == "create" {
            format!("{resource}:create")
        } else {
            request.permission.clone()
        };

        let bound: Vec<BoundPermission> =
            build_permissions_set(&request.object_id, &effective)
                .into_iter()
                .collect();

        if self.settings_allow(resource, &effective, &bound, &request.principals) {
            return Ok(Decision::Authorized);
        }

        let mut allowed =
            silo_permission::check_permission(&*self.permissions, &request.principals, &bound)
                .await?;

        // A write on a missing object will 404 anyway; showing that 404
        // only requires read access on the parent.
        if request.permission == "write" && !request.on_plural_endpoint && !request.object_exists
        {
            if let Some(parent) = parent_uri(&request.object_id) {
                let parent_bound: Vec<BoundPermission> =
                    build_permissions_set(parent, "read").into_iter().collect();
                allowed = silo_permission::check_permission(
                    &*self.permissions,
                    &request.principals,
                    &parent_bound,
                )
                .await?;
            }
        }

        // A list request passes if anything under the endpoint is shared
        // with the caller; the storage query then filters to those ids.
        let is_list = request.on_plural_endpoint && !effective.ends_with("create");
        if !allowed && is_list {
            allowed = !self
                .shared_object_ids(&request.principals, &request.object_id, &effective)
                .await?
                .is_empty();

            if !allowed && !bound.is_empty() {
                // Being allowed to create children grants seeing the
                // (possibly empty) list.
                if let Some(parent) = parent_uri(&request.object_id) {
                    let create_bound =
                        [BoundPermission::new(parent, format!("{resource}:create"))];
                    allowed = silo_permission::check_permission(
                        &*self.permissions,
                        &request.principals,
                        &create_bound,
                    )
                    .await?;
                }
            }
        }

        if allowed {
            return Ok(Decision::Authorized);
        }

        tracing::warn!(
            object_id = %request.object_id,
            permission = %effective,
            "permission not granted"
        );
        self.denial(request).await
    }

    /// Ids (last URI segment) of the endpoint's children shared with any
    /// of the principals, for list pre-filtering.
    pub async fn shared_object_ids(
        &self,
        principals: &PrincipalSet,
        plural_uri: &str,
        permission: &str,
    ) -> PermissionResult<Vec<String>> {
        let pattern = format!("{plural_uri}/*");
        let bound: Vec<BoundPermission> = build_permissions_set(&pattern, permission)
            .into_iter()
            .collect();
        let bound = if bound.is_empty() {
            vec![BoundPermission::new(pattern, permission)]
        } else {
            bound
        };
        let by_object = self
            .permissions
            .get_accessible_objects(principals, Some(&bound), false)
            .await?;
        Ok(by_object
            .keys()
            .filter_map(|uri| uri.rsplit('/').next().map(str::to_string))
            .collect())
    }

    fn settings_allow(
        &self,
        resource: &str,
        effective: &str,
        bound: &[BoundPermission],
        principals: &PrincipalSet,
    ) -> bool {
        let setting_key = |permission: &str| {
            if permission.starts_with(resource) {
                permission.replace(':', "_")
            } else {
                format!("{resource}_{}", permission.replace(':', "_"))
            }
        };
        // Root endpoints produce no bound grants; their setting is keyed
        // off the requested permission itself (e.g. `bucket_create`).
        let keys: Vec<String> = if bound.is_empty() {
            vec![setting_key(effective)]
        } else {
            bound.iter().map(|grant| setting_key(&grant.permission)).collect()
        };
        keys.iter().any(|key| {
            self.settings_principals
                .get(key)
                .is_some_and(|allowed| !allowed.is_disjoint(principals))
        })
    }

    async fn denial(&self, request: &AuthorizationRequest) -> PermissionResult<Decision> {
        // Root plural endpoints have no parent whose visibility could
        // leak anything.
        let Some(parent) = parent_uri(&request.object_id).filter(|p| !p.is_empty()) else {
            return Ok(Decision::forbidden());
        };
        if object_type(parent).is_none() {
            return Ok(Decision::forbidden());
        }
        let parent_bound: Vec<BoundPermission> =
            build_permissions_set(parent, "read").into_iter().collect();
        let parent_readable = silo_permission::check_permission(
            &*self.permissions,
            &request.principals,
            &parent_bound,
        )
        .await?;
        if parent_readable {
            Ok(Decision::forbidden())
        } else {
            Ok(Decision::not_visible())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_permission::MemoryPermissionBackend;
    use silo_test_fixtures::principals;
    use silo_types::DenialReason;

    const RECORD_URI: &str = "/buckets/blog/collections/articles/records/article1";
    const COLLECTION_URI: &str = "/buckets/blog/collections/articles";
    const GROUP_URI: &str = "/buckets/blog/groups/moderators";
    const BUCKET_URI: &str = "/buckets/blog";

    fn bound(pairs: &[(&str, &str)]) -> HashSet<BoundPermission> {
        pairs
            .iter()
            .map(|(object_id, permission)| BoundPermission::new(*object_id, *permission))
            .collect()
    }

    #[test]
    fn test_object_type_classification() {
        assert_eq!(object_type(RECORD_URI), Some(ObjectType::Record));
        assert_eq!(object_type(COLLECTION_URI), Some(ObjectType::Collection));
        assert_eq!(object_type(GROUP_URI), Some(ObjectType::Group));
        assert_eq!(object_type(BUCKET_URI), Some(ObjectType::Bucket));
        assert_eq!(object_type("invalid object id"), None);
        assert_eq!(object_type("/buckets"), None);
    }

    #[test]
    fn test_plural_child_endpoints_classify_as_their_owner() {
        assert_eq!(
            object_type("/buckets/blog/collections/articles/records"),
            Some(ObjectType::Collection)
        );
        assert_eq!(
            object_type("/buckets/blog/collections"),
            Some(ObjectType::Bucket)
        );
        assert_eq!(object_type("/buckets/blog/groups"), Some(ObjectType::Bucket));
    }

    #[test]
    fn test_build_permission_tuple_truncates_to_ancestors() {
        let parts: Vec<&str> = RECORD_URI.split('/').collect();
        assert_eq!(
            build_permission_tuple(ObjectType::Record, "write", &parts),
            Some(BoundPermission::new(RECORD_URI, "write"))
        );
        assert_eq!(
            build_permission_tuple(ObjectType::Collection, "record:create", &parts),
            Some(BoundPermission::new(COLLECTION_URI, "record:create"))
        );
        assert_eq!(
            build_permission_tuple(ObjectType::Bucket, "write", &parts),
            Some(BoundPermission::new(BUCKET_URI, "write"))
        );

        // A bucket URI is too shallow to name a record.
        let parts: Vec<&str> = BUCKET_URI.split('/').collect();
        assert_eq!(build_permission_tuple(ObjectType::Record, "write", &parts), None);
    }

    #[test]
    fn test_permissions_set_for_bucket() {
        assert_eq!(
            build_permissions_set(BUCKET_URI, "write"),
            bound(&[(BUCKET_URI, "write")])
        );
        assert_eq!(
            build_permissions_set(BUCKET_URI, "read"),
            bound(&[(BUCKET_URI, "write"), (BUCKET_URI, "read")])
        );
        assert_eq!(
            build_permissions_set("/buckets/blog/groups", "group:create"),
            bound(&[(BUCKET_URI, "write"), (BUCKET_URI, "group:create")])
        );
        assert_eq!(
            build_permissions_set("/buckets/blog/collections", "collection:create"),
            bound(&[(BUCKET_URI, "write"), (BUCKET_URI, "collection:create")])
        );
    }

    #[test]
    fn test_permissions_set_for_collection_and_group() {
        assert_eq!(
            build_permissions_set(COLLECTION_URI, "read"),
            bound(&[
                (BUCKET_URI, "write"),
                (BUCKET_URI, "read"),
                (COLLECTION_URI, "write"),
                (COLLECTION_URI, "read"),
            ])
        );
        assert_eq!(
            build_permissions_set(
                "/buckets/blog/collections/articles/records",
                "record:create"
            ),
            bound(&[
                (BUCKET_URI, "write"),
                (COLLECTION_URI, "write"),
                (COLLECTION_URI, "record:create"),
            ])
        );
        assert_eq!(
            build_permissions_set(GROUP_URI, "write"),
            bound(&[(BUCKET_URI, "write"), (GROUP_URI, "write")])
        );
    }

    #[test]
    fn test_permissions_set_for_record() {
        assert_eq!(
            build_permissions_set(RECORD_URI, "read"),
            bound(&[
                (BUCKET_URI, "write"),
                (BUCKET_URI, "read"),
                (COLLECTION_URI, "write"),
                (COLLECTION_URI, "read"),
                (RECORD_URI, "write"),
                (RECORD_URI, "read"),
            ])
        );
    }

    #[test]
    fn test_permissions_set_empty_for_unknown_uris() {
        assert!(build_permissions_set("/buckets", "read").is_empty());
        assert!(build_permissions_set(RECORD_URI, "fly").is_empty());
    }

    fn policy(store: Arc<MemoryPermissionBackend>) -> AuthorizationPolicy {
        AuthorizationPolicy::new(store)
    }

    fn request(object_id: &str, permission: &str) -> AuthorizationRequest {
        AuthorizationRequest {
            principals: principals(&["alice"]),
            object_id: object_id.to_string(),
            permission: permission.to_string(),
            on_plural_endpoint: false,
            object_exists: true,
        }
    }

    #[tokio::test]
    async fn test_bucket_write_reaches_nested_records() {
        let store = Arc::new(MemoryPermissionBackend::new());
        store
            .add_principal_to_ace(BUCKET_URI, "write", "alice")
            .await
            .unwrap();
        let policy = policy(store);

        let decision = policy.check(&request(RECORD_URI, "read")).await.unwrap();
        assert_eq!(decision, Decision::Authorized);
        let decision = policy.check(&request(RECORD_URI, "write")).await.unwrap();
        assert_eq!(decision, Decision::Authorized);
    }

    #[tokio::test]
    async fn test_collection_read_does_not_grant_write() {
        let store = Arc::new(MemoryPermissionBackend::new());
        store
            .add_principal_to_ace(COLLECTION_URI, "read", "alice")
            .await
            .unwrap();
        let policy = policy(store);

        assert_eq!(
            policy.check(&request(RECORD_URI, "read")).await.unwrap(),
            Decision::Authorized
        );
        assert_eq!(
            policy.check(&request(RECORD_URI, "write")).await.unwrap(),
            Decision::Denied {
                reason: DenialReason::Forbidden
            }
        );
    }

    #[tokio::test]
    async fn test_denial_presentation_tracks_parent_visibility() {
        let store = Arc::new(MemoryPermissionBackend::new());
        store
            .add_principal_to_ace(COLLECTION_URI, "read", "alice")
            .await
            .unwrap();
        let policy = policy(store);

        // Parent readable: the object may be named, present 403.
        assert_eq!(
            policy.check(&request(RECORD_URI, "write")).await.unwrap(),
            Decision::Denied {
                reason: DenialReason::Forbidden
            }
        );

        // No visibility anywhere: present 404.
        let hidden = request(
            "/buckets/vault/collections/secrets/records/s1",
            "read",
        );
        assert_eq!(
            policy.check(&hidden).await.unwrap(),
            Decision::Denied {
                reason: DenialReason::NotVisible
            }
        );
    }

    #[tokio::test]
    async fn test_root_plural_endpoint_presents_forbidden() {
        let store = Arc::new(MemoryPermissionBackend::new());
        let policy = policy(store);
        let mut req = request("/buckets", "read");
        req.on_plural_endpoint = true;
        req.object_exists = false;
        assert_eq!(
            policy.check(&req).await.unwrap(),
            Decision::Denied {
                reason: DenialReason::Forbidden
            }
        );
    }

    #[tokio::test]
    async fn test_list_allowed_when_some_children_are_shared() {
        let store = Arc::new(MemoryPermissionBackend::new());
        store
            .add_principal_to_ace(RECORD_URI, "read", "alice")
            .await
            .unwrap();
        let policy = policy(store);

        let mut req = request("/buckets/blog/collections/articles/records", "read");
        req.on_plural_endpoint = true;
        req.object_exists = false;
        assert_eq!(policy.check(&req).await.unwrap(), Decision::Authorized);

        let shared = policy
            .shared_object_ids(
                &principals(&["alice"]),
                "/buckets/blog/collections/articles/records",
                "read",
            )
            .await
            .unwrap();
        assert_eq!(shared, vec!["article1".to_string()]);
    }

    #[tokio::test]
    async fn test_list_allowed_via_parent_create_permission() {
        let store = Arc::new(MemoryPermissionBackend::new());
        store
            .add_principal_to_ace(COLLECTION_URI, "record:create", "alice")
            .await
            .unwrap();
        let policy = policy(store);

        let mut req = request("/buckets/blog/collections/articles/records", "read");
        req.on_plural_endpoint = true;
        req.object_exists = false;
        assert_eq!(policy.check(&req).await.unwrap(), Decision::Authorized);
    }

    #[tokio::test]
    async fn test_write_on_missing_object_needs_only_parent_read() {
        let store = Arc::new(MemoryPermissionBackend::new());
        store
            .add_principal_to_ace(COLLECTION_URI, "read", "alice")
            .await
            .unwrap();
        let policy = policy(store);

        let mut req = request(RECORD_URI, "write");
        req.object_exists = false;
        // The handler will answer 404; seeing that is allowed.
        assert_eq!(policy.check(&req).await.unwrap(), Decision::Authorized);
    }

    #[tokio::test]
    async fn test_settings_principals_short_circuit() {
        let store = Arc::new(MemoryPermissionBackend::new());
        let mut settings = HashMap::new();
        settings.insert("bucket_write".to_string(), principals(&["admin"]));
        let policy = AuthorizationPolicy::new(store).with_settings_principals(settings);

        let mut req = request(BUCKET_URI, "write");
        req.principals = principals(&["admin"]);
        assert_eq!(policy.check(&req).await.unwrap(), Decision::Authorized);
    }

    #[tokio::test]
    async fn test_public_objects_via_everyone_principal() {
        let store = Arc::new(MemoryPermissionBackend::new());
        store
            .add_principal_to_ace(RECORD_URI, "read", silo_types::PRINCIPAL_EVERYONE)
            .await
            .unwrap();
        let policy = policy(store);

        let mut req = request(RECORD_URI, "read");
        req.principals = principals(&[silo_types::PRINCIPAL_EVERYONE, "anonymous"]);
        assert_eq!(policy.check(&req).await.unwrap(), Decision::Authorized);
    }
}
