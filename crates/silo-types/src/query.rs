//! Query primitives shared by storage backends and the polling protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Record;

/// Comparison operator applied by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    /// Strict equality.
    Eq,
    /// Inequality.
    Not,
    /// Strictly lower than.
    Lt,
    /// Strictly greater than.
    Gt,
    /// Greater than or equal.
    Min,
    /// Lower than or equal.
    Max,
    /// Field value belongs to the given array.
    In,
    /// Field value does not belong to the given array.
    Exclude,
    /// Case-insensitive substring match, `*` wildcards allowed.
    Like,
    /// Field presence test (value `true` requires presence, `false` absence).
    Has,
}

/// A single field comparison. Filters combine with *AND*.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub value: Value,
    pub operator: ComparisonOperator,
}

impl Filter {
    pub fn new(
        field: impl Into<String>,
        value: impl Into<Value>,
        operator: ComparisonOperator,
    ) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            operator,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, value, ComparisonOperator::Eq)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, value, ComparisonOperator::Gt)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, value, ComparisonOperator::Lt)
    }
}

/// Sort direction for a [`Sort`] instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// A sort instruction. Instructions are cumulative: later entries break
/// ties left by earlier ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// One keyset-pagination rule: a conjunction of filters describing records
/// that come after the last returned one. Rules combine with *OR*.
pub type PaginationRule = Vec<Filter>;

/// Parameters of a `list` operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListQuery {
    pub filters: Vec<Filter>,
    pub sorting: Vec<Sort>,
    pub pagination_rules: Vec<PaginationRule>,
    pub limit: Option<usize>,
    pub include_deleted: bool,
}

impl ListQuery {
    pub fn with_filters(filters: Vec<Filter>) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }
}

/// One page of `list` results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub records: Vec<Record>,
    /// Total number of live records matching the filters, tombstones and
    /// pagination excluded.
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_builders() {
        let filter = Filter::gt("last_modified", 123);
        assert_eq!(filter.operator, ComparisonOperator::Gt);
        assert_eq!(filter.value, json!(123));
    }

    #[test]
    fn test_operator_serde_names() {
        let op: ComparisonOperator = serde_json::from_value(json!("exclude")).unwrap();
        assert_eq!(op, ComparisonOperator::Exclude);
    }
}
