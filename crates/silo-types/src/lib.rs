//! # Silo Types
//!
//! Shared type definitions for the Silo record storage and permission engine.
//!
//! This crate provides the core types used across the Silo workspace,
//! ensuring a single source of truth and preventing circular dependencies.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod query;

pub use query::{
    ComparisonOperator, Filter, ListQuery, Page, PaginationRule, Sort, SortDirection,
};

// ============================================================================
// Record Model
// ============================================================================

/// Field holding the unique record identifier.
pub const ID_FIELD: &str = "id";

/// Field holding the partition-scoped version of a record.
pub const MODIFIED_FIELD: &str = "last_modified";

/// Field marking a tombstone.
pub const DELETED_FIELD: &str = "deleted";

/// An arbitrary JSON record, keyed by string field names.
///
/// The storage layer maintains two system fields on every record: `id`
/// (generator-validated, unique within its partition) and `last_modified`
/// (a [`Timestamp`], unique and strictly increasing within its partition).
/// All other fields are resource-defined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a tombstone: the minimal record kept after a deletion.
    pub fn tombstone(id: &str, last_modified: Timestamp) -> Self {
        let mut fields = Map::new();
        fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        fields.insert(MODIFIED_FIELD.to_string(), Value::from(last_modified.0));
        fields.insert(DELETED_FIELD.to_string(), Value::Bool(true));
        Self(fields)
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn set_id(&mut self, id: &str) {
        self.0
            .insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    }

    pub fn last_modified(&self) -> Option<Timestamp> {
        self.0
            .get(MODIFIED_FIELD)
            .and_then(Value::as_i64)
            .map(Timestamp)
    }

    pub fn set_last_modified(&mut self, timestamp: Timestamp) {
        self.0
            .insert(MODIFIED_FIELD.to_string(), Value::from(timestamp.0));
    }

    pub fn is_tombstone(&self) -> bool {
        self.0.get(DELETED_FIELD).and_then(Value::as_bool) == Some(true)
    }

    /// Look up a field value, following dots into nested objects
    /// (`"author.name"` reads `{"author": {"name": ...}}`).
    pub fn field(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn insert(&mut self, field: &str, value: Value) {
        self.0.insert(field.to_string(), value);
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// A partition version: microseconds since the Unix epoch, bumped past the
/// previous value whenever the clock stalls or goes backwards.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn zero() -> Self {
        Self(0)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Current wall-clock time in epoch microseconds.
    pub fn now() -> Self {
        let micros = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros();
        Self(micros as i64)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Permissions
// ============================================================================

/// Principal granted to every request, authenticated or not.
pub const PRINCIPAL_EVERYONE: &str = "system.Everyone";

/// Principal granted to every authenticated request.
pub const PRINCIPAL_AUTHENTICATED: &str = "system.Authenticated";

/// A set of opaque principal strings (user ids or groups).
pub type PrincipalSet = HashSet<String>;

/// A full ACL: permission name to the set of principals holding it.
pub type Acl = HashMap<String, PrincipalSet>;

/// A permission bound to a specific object id.
///
/// The object id may carry a `*` wildcard when used as a lookup pattern
/// (e.g. `/buckets/blog/collections/*`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundPermission {
    pub object_id: String,
    pub permission: String,
}

impl BoundPermission {
    pub fn new(object_id: impl Into<String>, permission: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            permission: permission.into(),
        }
    }
}

// ============================================================================
// Authorization Decisions
// ============================================================================

/// Why a request was denied, and how the denial should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenialReason {
    /// The caller can see the object exists but lacks the permission.
    /// Presented as 403 Forbidden.
    Forbidden,
    /// The caller cannot even see the enclosing scope; the object's
    /// existence must not leak. Presented as 404 Not Found.
    NotVisible,
}

/// The outcome of an authorization check. Denial is a value, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Authorized,
    Denied { reason: DenialReason },
}

impl Decision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Decision::Authorized)
    }

    pub fn forbidden() -> Self {
        Decision::Denied {
            reason: DenialReason::Forbidden,
        }
    }

    pub fn not_visible() -> Self {
        Decision::Denied {
            reason: DenialReason::NotVisible,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors surfaced by storage backends.
///
/// Backends normalize driver-specific faults into [`StorageError::Backend`]
/// before returning; driver error types never cross this boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying storage or connection fault. Surfaced as 5xx.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// The record is absent or tombstoned. Control flow, never logged as
    /// an error; callers translate to 404 or 410.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A declared-unique field collides with an existing live record in
    /// the same partition. Carries the colliding record.
    #[error("unicity constraint violated on field {field:?}")]
    Unicity { field: String, record: Record },

    /// A caller-supplied id does not satisfy the partition's id generator.
    #[error("invalid record id: {0:?}")]
    InvalidId(String),

    /// An id generator failed the self-match invariant at construction.
    /// Fatal at startup.
    #[error("invalid id generator configuration: {0}")]
    InvalidGeneratorConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by permission backends.
#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("permission backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PermissionResult<T> = std::result::Result<T, PermissionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tombstone_shape() {
        let tombstone = Record::tombstone("abc", Timestamp(42));
        assert_eq!(tombstone.id(), Some("abc"));
        assert_eq!(tombstone.last_modified(), Some(Timestamp(42)));
        assert!(tombstone.is_tombstone());
        assert_eq!(tombstone.0.len(), 3);
    }

    #[test]
    fn test_nested_field_lookup() {
        let mut record = Record::new();
        record.insert("author", json!({"name": {"first": "Ada"}}));
        assert_eq!(record.field("author.name.first"), Some(&json!("Ada")));
        assert_eq!(record.field("author.name.last"), None);
        assert_eq!(record.field("missing"), None);
    }

    #[test]
    fn test_timestamp_ordering() {
        let t1 = Timestamp(1);
        let t2 = Timestamp(2);
        assert!(t1 < t2);
        assert_eq!(t1.next(), Timestamp(2));
        assert!(Timestamp::now() > Timestamp::zero());
    }

    #[test]
    fn test_decision_presentation() {
        assert!(Decision::Authorized.is_authorized());
        assert_eq!(
            Decision::forbidden(),
            Decision::Denied {
                reason: DenialReason::Forbidden
            }
        );
        assert!(!Decision::not_visible().is_authorized());
    }

    #[test]
    fn test_record_serde_transparent() {
        let record: Record = serde_json::from_value(json!({"id": "x", "title": "hi"})).unwrap();
        assert_eq!(record.id(), Some("x"));
        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back, json!({"id": "x", "title": "hi"}));
    }
}
