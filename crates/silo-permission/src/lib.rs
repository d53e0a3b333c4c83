//! # Silo Permission - ACL Storage Layer
//!
//! Stores two kinds of facts: user-to-group principal bindings and
//! access control entries `(object_id, permission) -> principals`.
//! Object ids are hierarchical URIs (`/buckets/blog/collections/articles`)
//! and lookup patterns may carry a `*` wildcard.
//!
//! This layer answers "who holds what on which object"; deciding whether
//! a request passes is the authorization engine's job.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use silo_types::{Acl, BoundPermission, PermissionResult, PrincipalSet};

pub mod factory;
pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use factory::{PermissionBackendType, PermissionConfig, PermissionFactory};
pub use memory::MemoryPermissionBackend;

#[cfg(feature = "postgres")]
pub use postgres::PostgresPermissionBackend;

/// Principal used by [`heartbeat`] probes.
const HEARTBEAT_PRINCIPAL: &str = "__heartbeat__";

/// The abstract permission store interface.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Create every necessary object (tables, indices) in the backend.
    /// Idempotent; executed by the `silo migrate` command.
    async fn initialize_schema(&self) -> PermissionResult<()>;

    /// Remove every ACE and principal binding.
    async fn flush(&self) -> PermissionResult<()>;

    /// Bind an extra principal (typically a group) to a user. Idempotent.
    async fn add_user_principal(&self, user_id: &str, principal: &str) -> PermissionResult<()>;

    /// Unbind a principal from a user. Unbinding an absent principal is
    /// not an error.
    async fn remove_user_principal(&self, user_id: &str, principal: &str)
        -> PermissionResult<()>;

    /// Remove a principal from every user it is bound to (e.g. when a
    /// group object is deleted).
    async fn remove_principal(&self, principal: &str) -> PermissionResult<()>;

    /// Every principal bound to `user_id`, unioned with the principals
    /// bound to `system.Authenticated` (groups granted to all logged-in
    /// users).
    async fn get_user_principals(&self, user_id: &str) -> PermissionResult<PrincipalSet>;

    /// Grant `principal` the `permission` on `object_id`. Idempotent.
    async fn add_principal_to_ace(
        &self,
        object_id: &str,
        permission: &str,
        principal: &str,
    ) -> PermissionResult<()>;

    /// Revoke one grant. Revoking an absent grant is not an error.
    async fn remove_principal_from_ace(
        &self,
        object_id: &str,
        permission: &str,
        principal: &str,
    ) -> PermissionResult<()>;

    /// Principals holding `permission` on `object_id` (exact match, no
    /// inheritance).
    async fn get_object_permission_principals(
        &self,
        object_id: &str,
        permission: &str,
    ) -> PermissionResult<PrincipalSet>;

    /// Objects on which any of `principals` holds something.
    ///
    /// With `bound_permissions`, only the listed `(pattern, permission)`
    /// pairs are considered; patterns may carry `*`, which spans path
    /// separators when `with_children` is set and stops at them otherwise.
    /// Without them, every ACE is considered. Returns object_id to the
    /// set of permissions held there.
    async fn get_accessible_objects(
        &self,
        principals: &PrincipalSet,
        bound_permissions: Option<&[BoundPermission]>,
        with_children: bool,
    ) -> PermissionResult<HashMap<String, HashSet<String>>>;

    /// Union of the principals holding any of `bound_permissions`
    /// (exact object ids, no patterns).
    async fn get_authorized_principals(
        &self,
        bound_permissions: &[BoundPermission],
    ) -> PermissionResult<PrincipalSet>;

    /// The full ACL of one object.
    async fn get_object_permissions(&self, object_id: &str) -> PermissionResult<Acl>;

    /// The full ACLs of several objects, in input order.
    async fn get_objects_permissions(&self, object_ids: &[&str]) -> PermissionResult<Vec<Acl>>;

    /// Overwrite entries of `object_id`'s ACL: each permission named in
    /// `permissions` is replaced by its new principal set, and an empty
    /// set removes the entry. Permissions not named are left alone.
    async fn replace_object_permissions(
        &self,
        object_id: &str,
        permissions: &Acl,
    ) -> PermissionResult<()>;

    /// Drop every ACE whose object id matches one of `patterns`
    /// (`*` spans path separators). Used for cascade cleanup on delete.
    async fn delete_object_permissions(&self, patterns: &[&str]) -> PermissionResult<()>;
}

/// True when any of `principals` holds any of `bound_permissions`.
pub async fn check_permission(
    store: &dyn PermissionStore,
    principals: &PrincipalSet,
    bound_permissions: &[BoundPermission],
) -> PermissionResult<bool> {
    let authorized = store.get_authorized_principals(bound_permissions).await?;
    Ok(!authorized.is_disjoint(principals))
}

/// Probe that the store is operational by granting and revoking a probe
/// binding. Used by ops tooling.
pub async fn heartbeat(store: &dyn PermissionStore) -> bool {
    let probe = async {
        store
            .add_user_principal(HEARTBEAT_PRINCIPAL, HEARTBEAT_PRINCIPAL)
            .await?;
        store
            .remove_user_principal(HEARTBEAT_PRINCIPAL, HEARTBEAT_PRINCIPAL)
            .await
    };
    match probe.await {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(error = %err, "permission heartbeat failed");
            false
        }
    }
}
