//! Shared fixtures for workspace tests.

use serde_json::Value;
use silo_types::{Acl, PrincipalSet, Record};

/// Build a [`Record`] from a JSON object literal.
///
/// Panics on non-object values; fixtures are test-only.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(fields) => Record(fields),
        other => panic!("record fixture requires a JSON object, got {other}"),
    }
}

/// A small article record, the workhorse of storage tests.
pub fn article(title: &str, rating: i64) -> Record {
    record(serde_json::json!({"title": title, "rating": rating}))
}

pub fn principals(names: &[&str]) -> PrincipalSet {
    names.iter().map(|name| name.to_string()).collect()
}

/// Build an ACL from `(permission, principals)` pairs.
pub fn acl(entries: &[(&str, &[&str])]) -> Acl {
    entries
        .iter()
        .map(|(permission, holders)| (permission.to_string(), principals(holders)))
        .collect()
}
