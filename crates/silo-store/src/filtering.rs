//! In-memory filtering, sorting and pagination over JSON records.
//!
//! Comparison semantics follow the PostgreSQL jsonb sort order so that the
//! memory backend stays interchangeable with SQL backends:
//! null < string < number < bool < array < object < missing field.

use std::cmp::Ordering;

use regex::RegexBuilder;
use serde_json::Value;
use silo_types::{ComparisonOperator, Filter, PaginationRule, Record, Sort, SortDirection};

/// Rank tag enforcing the cross-type sort order. A missing field ranks
/// after every present value, like SQL NULL.
fn value_rank(value: Option<&Value>) -> u8 {
    match value {
        Some(Value::Null) => 0,
        Some(Value::String(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::Bool(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
        None => 6,
    }
}

/// Total order over optional JSON values: rank first, then value.
pub fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    let by_rank = value_rank(left).cmp(&value_rank(right));
    if by_rank != Ordering::Equal {
        return by_rank;
    }
    match (left, right) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            // Integers compare exactly; f64 loses precision past 2^53,
            // which would collapse distinct timestamps.
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                a.cmp(&b)
            } else if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
                a.cmp(&b)
            } else {
                let a = a.as_f64().unwrap_or(f64::NAN);
                let b = b.as_f64().unwrap_or(f64::NAN);
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
        }
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(a @ Value::Array(_)), Some(b @ Value::Array(_)))
        | (Some(a @ Value::Object(_)), Some(b @ Value::Object(_))) => {
            // Predictable serialization; serde_json maps are key-ordered.
            let a = a.to_string();
            let b = b.to_string();
            a.cmp(&b)
        }
        _ => Ordering::Equal,
    }
}

fn like_matches(candidate: Option<&Value>, pattern: &Value) -> bool {
    let (Some(Value::String(candidate)), Value::String(pattern)) = (candidate, pattern) else {
        return false;
    };
    // Implicit surrounding wildcards when none are given.
    let pattern = if pattern.contains('*') {
        pattern.clone()
    } else {
        format!("*{pattern}*")
    };
    let pattern = format!("^{}$", regex::escape(&pattern).replace(r"\*", ".*"));
    match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(regex) => regex.is_match(candidate),
        Err(_) => false,
    }
}

fn in_matches(candidate: Option<&Value>, allowed: &Value) -> bool {
    match (candidate, allowed) {
        (Some(candidate), Value::Array(allowed)) => allowed
            .iter()
            .any(|value| compare_values(Some(candidate), Some(value)) == Ordering::Equal),
        _ => false,
    }
}

/// Whether `record` satisfies a single filter.
pub fn matches_filter(record: &Record, filter: &Filter) -> bool {
    let left = record.field(&filter.field);
    let right = Some(&filter.value);
    match filter.operator {
        ComparisonOperator::Eq => compare_values(left, right) == Ordering::Equal,
        ComparisonOperator::Not => compare_values(left, right) != Ordering::Equal,
        ComparisonOperator::Lt => left.is_some() && compare_values(left, right) == Ordering::Less,
        ComparisonOperator::Gt => {
            left.is_some() && compare_values(left, right) == Ordering::Greater
        }
        ComparisonOperator::Min => {
            left.is_some() && compare_values(left, right) != Ordering::Less
        }
        ComparisonOperator::Max => {
            left.is_some() && compare_values(left, right) != Ordering::Greater
        }
        ComparisonOperator::In => in_matches(left, &filter.value),
        ComparisonOperator::Exclude => !in_matches(left, &filter.value),
        ComparisonOperator::Like => like_matches(left, &filter.value),
        ComparisonOperator::Has => {
            let wanted = filter.value.as_bool().unwrap_or(true);
            left.is_some() == wanted
        }
    }
}

/// Whether `record` satisfies every filter (AND).
pub fn matches_all(record: &Record, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| matches_filter(record, filter))
}

/// Cumulative stable sort by every instruction in `sorting`.
pub fn apply_sorting(records: &mut [Record], sorting: &[Sort]) {
    for sort in sorting.iter().rev() {
        records.sort_by(|a, b| {
            let ordering = compare_values(a.field(&sort.field), b.field(&sort.field));
            match sort.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        });
    }
}

/// Apply filters, keyset pagination rules, sorting and limit.
///
/// Returns the page and the total number of matching live records
/// (tombstones and pagination excluded).
pub fn extract_record_set(
    records: Vec<Record>,
    filters: &[Filter],
    sorting: &[Sort],
    pagination_rules: &[PaginationRule],
    limit: Option<usize>,
) -> (Vec<Record>, usize) {
    let filtered: Vec<Record> = records
        .into_iter()
        .filter(|record| matches_all(record, filters))
        .collect();

    let total = filtered
        .iter()
        .filter(|record| !record.is_tombstone())
        .count();

    let mut paginated: Vec<Record> = if pagination_rules.is_empty() {
        filtered
    } else {
        filtered
            .into_iter()
            .filter(|record| {
                pagination_rules
                    .iter()
                    .any(|rule| matches_all(record, rule))
            })
            .collect()
    };

    apply_sorting(&mut paginated, sorting);

    if let Some(limit) = limit {
        paginated.truncate(limit);
    }

    (paginated, total)
}
