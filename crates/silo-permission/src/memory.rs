//! In-memory permission backend.
//!
//! Keeps bindings and ACEs in nested hash maps behind a `tokio` RwLock.
//! Used in tests and development; also the reference for what the
//! PostgreSQL backend must do.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use silo_types::{Acl, BoundPermission, PermissionError, PermissionResult, PrincipalSet};
use silo_types::PRINCIPAL_AUTHENTICATED;
use tokio::sync::RwLock;

use crate::PermissionStore;

#[derive(Default)]
struct MemoryPermissionState {
    /// user_id -> principals bound to it.
    users: HashMap<String, PrincipalSet>,
    /// object_id -> permission -> principals holding it.
    aces: HashMap<String, HashMap<String, PrincipalSet>>,
}

/// Compile an object-id pattern. `*` spans path separators when
/// `with_children` is set, and stops at them otherwise.
fn object_pattern(pattern: &str, with_children: bool) -> PermissionResult<Regex> {
    let wildcard = if with_children { ".*" } else { "[^/]+" };
    let escaped = regex::escape(pattern).replace(r"\*", wildcard);
    Regex::new(&format!("^{escaped}$"))
        .map_err(|err| PermissionError::Backend(format!("invalid object pattern: {err}")))
}

/// In-memory implementation of [`PermissionStore`].
#[derive(Default)]
pub struct MemoryPermissionBackend {
    state: Arc<RwLock<MemoryPermissionState>>,
}

impl MemoryPermissionBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionStore for MemoryPermissionBackend {
    async fn initialize_schema(&self) -> PermissionResult<()> {
        Ok(())
    }

    async fn flush(&self) -> PermissionResult<()> {
        let mut state = self.state.write().await;
        state.users.clear();
        state.aces.clear();
        Ok(())
    }

    async fn add_user_principal(&self, user_id: &str, principal: &str) -> PermissionResult<()> {
        let mut state = self.state.write().await;
        state
            .users
            .entry(user_id.to_string())
            .or_default()
            .insert(principal.to_string());
        Ok(())
    }

    async fn remove_user_principal(
        &self,
        user_id: &str,
        principal: &str,
    ) -> PermissionResult<()> {
        let mut state = self.state.write().await;
        if let Some(principals) = state.users.get_mut(user_id) {
            principals.remove(principal);
            if principals.is_empty() {
                state.users.remove(user_id);
            }
        }
        Ok(())
    }

    async fn remove_principal(&self, principal: &str) -> PermissionResult<()> {
        let mut state = self.state.write().await;
        for principals in state.users.values_mut() {
            principals.remove(principal);
        }
        state.users.retain(|_, principals| !principals.is_empty());
        Ok(())
    }

    async fn get_user_principals(&self, user_id: &str) -> PermissionResult<PrincipalSet> {
        let state = self.state.read().await;
        let mut principals = state.users.get(user_id).cloned().unwrap_or_default();
        // Groups granted to every authenticated user apply to everyone.
        if let Some(shared) = state.users.get(PRINCIPAL_AUTHENTICATED) {
            principals.extend(shared.iter().cloned());
        }
        Ok(principals)
    }

    async fn add_principal_to_ace(
        &self,
        object_id: &str,
        permission: &str,
        principal: &str,
    ) -> PermissionResult<()> {
        let mut state = self.state.write().await;
        state
            .aces
            .entry(object_id.to_string())
            .or_default()
            .entry(permission.to_string())
            .or_default()
            .insert(principal.to_string());
        Ok(())
    }

    async fn remove_principal_from_ace(
        &self,
        object_id: &str,
        permission: &str,
        principal: &str,
    ) -> PermissionResult<()> {
        let mut state = self.state.write().await;
        if let Some(acl) = state.aces.get_mut(object_id) {
            if let Some(principals) = acl.get_mut(permission) {
                principals.remove(principal);
                if principals.is_empty() {
                    acl.remove(permission);
                }
            }
            if acl.is_empty() {
                state.aces.remove(object_id);
            }
        }
        Ok(())
    }

    async fn get_object_permission_principals(
        &self,
        object_id: &str,
        permission: &str,
    ) -> PermissionResult<PrincipalSet> {
        let state = self.state.read().await;
        Ok(state
            .aces
            .get(object_id)
            .and_then(|acl| acl.get(permission))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_accessible_objects(
        &self,
        principals: &PrincipalSet,
        bound_permissions: Option<&[BoundPermission]>,
        with_children: bool,
    ) -> PermissionResult<HashMap<String, HashSet<String>>> {
        let state = self.state.read().await;
        let mut by_object: HashMap<String, HashSet<String>> = HashMap::new();

        match bound_permissions {
            None => {
                for (object_id, acl) in &state.aces {
                    for (permission, holders) in acl {
                        if !holders.is_disjoint(principals) {
                            by_object
                                .entry(object_id.clone())
                                .or_default()
                                .insert(permission.clone());
                        }
                    }
                }
            }
            Some(bound) => {
                for BoundPermission {
                    object_id: pattern,
                    permission,
                } in bound
                {
                    let regex = object_pattern(pattern, with_children)?;
                    for (object_id, acl) in &state.aces {
                        if !regex.is_match(object_id) {
                            continue;
                        }
                        let Some(holders) = acl.get(permission) else {
                            continue;
                        };
                        if !holders.is_disjoint(principals) {
                            by_object
                                .entry(object_id.clone())
                                .or_default()
                                .insert(permission.clone());
                        }
                    }
                }
            }
        }
        Ok(by_object)
    }

    async fn get_authorized_principals(
        &self,
        bound_permissions: &[BoundPermission],
    ) -> PermissionResult<PrincipalSet> {
        let state = self.state.read().await;
        let mut principals = PrincipalSet::new();
        for bound in bound_permissions {
            if let Some(holders) = state
                .aces
                .get(&bound.object_id)
                .and_then(|acl| acl.get(&bound.permission))
            {
                principals.extend(holders.iter().cloned());
            }
        }
        Ok(principals)
    }

    async fn get_object_permissions(&self, object_id: &str) -> PermissionResult<Acl> {
        let state = self.state.read().await;
        Ok(state.aces.get(object_id).cloned().unwrap_or_default())
    }

    async fn get_objects_permissions(&self, object_ids: &[&str]) -> PermissionResult<Vec<Acl>> {
        let state = self.state.read().await;
        Ok(object_ids
            .iter()
            .map(|object_id| state.aces.get(*object_id).cloned().unwrap_or_default())
            .collect())
    }

    async fn replace_object_permissions(
        &self,
        object_id: &str,
        permissions: &Acl,
    ) -> PermissionResult<()> {
        let mut state = self.state.write().await;
        let acl = state.aces.entry(object_id.to_string()).or_default();
        for (permission, principals) in permissions {
            if principals.is_empty() {
                acl.remove(permission);
            } else {
                acl.insert(permission.clone(), principals.clone());
            }
        }
        if acl.is_empty() {
            state.aces.remove(object_id);
        }
        Ok(())
    }

    async fn delete_object_permissions(&self, patterns: &[&str]) -> PermissionResult<()> {
        let regexes = patterns
            .iter()
            .map(|pattern| object_pattern(pattern, true))
            .collect::<PermissionResult<Vec<_>>>()?;
        let mut state = self.state.write().await;
        state
            .aces
            .retain(|object_id, _| !regexes.iter().any(|regex| regex.is_match(object_id)));
        Ok(())
    }
}
