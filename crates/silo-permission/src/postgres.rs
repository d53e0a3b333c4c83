//! PostgreSQL permission backend.
//!
//! Two tables: `user_principals` for group bindings and
//! `access_control_entries` for ACEs. Wildcard object-id patterns are
//! pre-filtered in SQL with `LIKE` and refined in Rust with the same
//! regex the memory backend uses, so both backends match identically.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use regex::Regex;
use silo_types::{
    Acl, BoundPermission, PermissionError, PermissionResult, PrincipalSet,
    PRINCIPAL_AUTHENTICATED,
};
use tokio_postgres::NoTls;

use crate::PermissionStore;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS user_principals (
    user_id TEXT NOT NULL,
    principal TEXT NOT NULL,
    PRIMARY KEY (user_id, principal)
);
CREATE TABLE IF NOT EXISTS access_control_entries (
    object_id TEXT NOT NULL,
    permission TEXT NOT NULL,
    principal TEXT NOT NULL,
    PRIMARY KEY (object_id, permission, principal)
);
CREATE INDEX IF NOT EXISTS idx_aces_object_id
    ON access_control_entries (object_id);
CREATE INDEX IF NOT EXISTS idx_aces_principal
    ON access_control_entries (principal);
"#;

fn pg_err(err: impl std::fmt::Display) -> PermissionError {
    PermissionError::Backend(err.to_string())
}

/// Same wildcard semantics as the memory backend.
fn object_pattern(pattern: &str, with_children: bool) -> PermissionResult<Regex> {
    let wildcard = if with_children { ".*" } else { "[^/]+" };
    let escaped = regex::escape(pattern).replace(r"\*", wildcard);
    Regex::new(&format!("^{escaped}$"))
        .map_err(|err| PermissionError::Backend(format!("invalid object pattern: {err}")))
}

/// Coarse SQL pre-filter for a wildcard pattern.
fn like_pattern(pattern: &str) -> String {
    pattern
        .replace('%', r"\%")
        .replace('_', r"\_")
        .replace('*', "%")
}

/// PostgreSQL implementation of [`PermissionStore`].
pub struct PostgresPermissionBackend {
    pool: Pool,
}

impl PostgresPermissionBackend {
    pub async fn connect(connection_string: &str, pool_size: usize) -> PermissionResult<Self> {
        let pg_config: tokio_postgres::Config = connection_string.parse().map_err(pg_err)?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(pool_size)
            .build()
            .map_err(pg_err)?;
        Ok(Self { pool })
    }

    async fn client(&self) -> PermissionResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pg_err)
    }
}

#[async_trait]
impl PermissionStore for PostgresPermissionBackend {
    async fn initialize_schema(&self) -> PermissionResult<()> {
        let client = self.client().await?;
        client.batch_execute(SCHEMA_SQL).await.map_err(pg_err)?;
        tracing::info!("postgresql permission schema initialized");
        Ok(())
    }

    async fn flush(&self) -> PermissionResult<()> {
        let client = self.client().await?;
        client
            .batch_execute("TRUNCATE user_principals, access_control_entries;")
            .await
            .map_err(pg_err)
    }

    async fn add_user_principal(&self, user_id: &str, principal: &str) -> PermissionResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO user_principals (user_id, principal) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
                &[&user_id, &principal],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn remove_user_principal(
        &self,
        user_id: &str,
        principal: &str,
    ) -> PermissionResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "DELETE FROM user_principals WHERE user_id = $1 AND principal = $2",
                &[&user_id, &principal],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn remove_principal(&self, principal: &str) -> PermissionResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "DELETE FROM user_principals WHERE principal = $1",
                &[&principal],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn get_user_principals(&self, user_id: &str) -> PermissionResult<PrincipalSet> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT principal FROM user_principals WHERE user_id = $1 OR user_id = $2",
                &[&user_id, &PRINCIPAL_AUTHENTICATED],
            )
            .await
            .map_err(pg_err)?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn add_principal_to_ace(
        &self,
        object_id: &str,
        permission: &str,
        principal: &str,
    ) -> PermissionResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO access_control_entries (object_id, permission, principal) \
                 VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
                &[&object_id, &permission, &principal],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn remove_principal_from_ace(
        &self,
        object_id: &str,
        permission: &str,
        principal: &str,
    ) -> PermissionResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "DELETE FROM access_control_entries \
                 WHERE object_id = $1 AND permission = $2 AND principal = $3",
                &[&object_id, &permission, &principal],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn get_object_permission_principals(
        &self,
        object_id: &str,
        permission: &str,
    ) -> PermissionResult<PrincipalSet> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT principal FROM access_control_entries \
                 WHERE object_id = $1 AND permission = $2",
                &[&object_id, &permission],
            )
            .await
            .map_err(pg_err)?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn get_accessible_objects(
        &self,
        principals: &PrincipalSet,
        bound_permissions: Option<&[BoundPermission]>,
        with_children: bool,
    ) -> PermissionResult<HashMap<String, HashSet<String>>> {
        let client = self.client().await?;
        let holders: Vec<String> = principals.iter().cloned().collect();
        let mut by_object: HashMap<String, HashSet<String>> = HashMap::new();

        match bound_permissions {
            None => {
                let rows = client
                    .query(
                        "SELECT object_id, permission FROM access_control_entries \
                         WHERE principal = ANY($1)",
                        &[&holders],
                    )
                    .await
                    .map_err(pg_err)?;
                for row in rows {
                    let object_id: String = row.get(0);
                    let permission: String = row.get(1);
                    by_object.entry(object_id).or_default().insert(permission);
                }
            }
            Some(bound) => {
                for BoundPermission {
                    object_id: pattern,
                    permission,
                } in bound
                {
                    let regex = object_pattern(pattern, with_children)?;
                    let rows = client
                        .query(
                            "SELECT object_id FROM access_control_entries \
                             WHERE permission = $1 AND principal = ANY($2) \
                               AND object_id LIKE $3",
                            &[&permission, &holders, &like_pattern(pattern)],
                        )
                        .await
                        .map_err(pg_err)?;
                    for row in rows {
                        let object_id: String = row.get(0);
                        if regex.is_match(&object_id) {
                            by_object
                                .entry(object_id)
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
        let client = self.client().await?;
        let mut principals = PrincipalSet::new();
        for bound in bound_permissions {
            let rows = client
                .query(
                    "SELECT principal FROM access_control_entries \
                     WHERE object_id = $1 AND permission = $2",
                    &[&bound.object_id, &bound.permission],
                )
                .await
                .map_err(pg_err)?;
            principals.extend(rows.iter().map(|row| row.get::<_, String>(0)));
        }
        Ok(principals)
    }

    async fn get_object_permissions(&self, object_id: &str) -> PermissionResult<Acl> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT permission, principal FROM access_control_entries \
                 WHERE object_id = $1",
                &[&object_id],
            )
            .await
            .map_err(pg_err)?;
        let mut acl = Acl::new();
        for row in rows {
            let permission: String = row.get(0);
            acl.entry(permission).or_default().insert(row.get(1));
        }
        Ok(acl)
    }

    async fn get_objects_permissions(&self, object_ids: &[&str]) -> PermissionResult<Vec<Acl>> {
        let mut acls = Vec::with_capacity(object_ids.len());
        for object_id in object_ids {
            acls.push(self.get_object_permissions(object_id).await?);
        }
        Ok(acls)
    }

    async fn replace_object_permissions(
        &self,
        object_id: &str,
        permissions: &Acl,
    ) -> PermissionResult<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(pg_err)?;
        for (permission, principals) in permissions {
            tx.execute(
                "DELETE FROM access_control_entries \
                 WHERE object_id = $1 AND permission = $2",
                &[&object_id, &permission],
            )
            .await
            .map_err(pg_err)?;
            for principal in principals {
                tx.execute(
                    "INSERT INTO access_control_entries (object_id, permission, principal) \
                     VALUES ($1, $2, $3)",
                    &[&object_id, &permission, &principal],
                )
                .await
                .map_err(pg_err)?;
            }
        }
        tx.commit().await.map_err(pg_err)?;
        Ok(())
    }

    async fn delete_object_permissions(&self, patterns: &[&str]) -> PermissionResult<()> {
        let client = self.client().await?;
        for pattern in patterns {
            let regex = object_pattern(pattern, true)?;
            let rows = client
                .query(
                    "SELECT DISTINCT object_id FROM access_control_entries \
                     WHERE object_id LIKE $1",
                    &[&like_pattern(pattern)],
                )
                .await
                .map_err(pg_err)?;
            let victims: Vec<String> = rows
                .iter()
                .map(|row| row.get::<_, String>(0))
                .filter(|object_id| regex.is_match(object_id))
                .collect();
            if victims.is_empty() {
                continue;
            }
            client
                .execute(
                    "DELETE FROM access_control_entries WHERE object_id = ANY($1)",
                    &[&victims],
                )
                .await
                .map_err(pg_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_sql_wildcards() {
        assert_eq!(like_pattern("/buckets/b_1/*"), r"/buckets/b\_1/%");
        assert_eq!(like_pattern("100%"), r"100\%");
    }

    #[test]
    fn test_object_pattern_scope() {
        let children = object_pattern("/buckets/blog/collections/*", true).unwrap();
        assert!(children.is_match("/buckets/blog/collections/a/records/r"));
        let flat = object_pattern("/buckets/blog/collections/*", false).unwrap();
        assert!(flat.is_match("/buckets/blog/collections/a"));
        assert!(!flat.is_match("/buckets/blog/collections/a/records/r"));
    }
}
