//! Change polling over a partition.
//!
//! Sync clients poll with `_since=<timestamp>` to fetch everything that
//! changed after their last sync, tombstones included, and page through
//! large result sets with an opaque continuation token. The token is
//! base64-encoded JSON of the last record's sort-key values; the next
//! page resumes strictly after that position.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::{Map, Value};
use silo_store::RecordStore;
use silo_types::{
    ComparisonOperator, Filter, ListQuery, PaginationRule, Record, Sort, SortDirection,
    StorageError, Timestamp, MODIFIED_FIELD,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    /// The continuation token is not ours or was truncated.
    #[error("invalid pagination token")]
    InvalidToken,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Parameters of one poll request.
#[derive(Debug, Clone, Default)]
pub struct PollQuery {
    /// Only changes strictly after this timestamp. Implies tombstones.
    pub since: Option<Timestamp>,
    /// Only changes strictly before this timestamp.
    pub before: Option<Timestamp>,
    /// Extra field filters, combined with the window bounds.
    pub filters: Vec<Filter>,
    /// Sort order; defaults to `last_modified` descending.
    pub sorting: Vec<Sort>,
    pub limit: Option<usize>,
    /// Continuation token from the previous page.
    pub token: Option<String>,
}

/// One page of changes.
#[derive(Debug, Clone)]
pub struct PollPage {
    pub records: Vec<Record>,
    /// Live records matching the filters, tombstones excluded.
    pub total: usize,
    /// Present when the page was cut by `limit`.
    pub next_token: Option<String>,
    /// Partition watermark at read time; the client's next `_since`.
    /// Returned even when no records match.
    pub timestamp: Timestamp,
}

/// Fetch one page of changes from a partition.
pub async fn poll_changes(
    store: &dyn RecordStore,
    resource_name: &str,
    parent_id: &str,
    query: &PollQuery,
) -> Result<PollPage, PollError> {
    let sorting = if query.sorting.is_empty() {
        vec![Sort::descending(MODIFIED_FIELD)]
    } else {
        query.sorting.clone()
    };

    let mut filters = query.filters.clone();
    if let Some(since) = query.since {
        filters.push(Filter::gt(MODIFIED_FIELD, since.0));
    }
    if let Some(before) = query.before {
        filters.push(Filter::lt(MODIFIED_FIELD, before.0));
    }

    let pagination_rules = match &query.token {
        Some(token) => build_pagination_rules(&sorting, &decode_token(token)?),
        None => Vec::new(),
    };

    let list_query = ListQuery {
        filters,
        sorting: sorting.clone(),
        pagination_rules,
        limit: query.limit,
        // A client that asks "what changed since X" must see deletions.
        include_deleted: query.since.is_some(),
    };
    let page = store.list(resource_name, parent_id, &list_query).await?;
    let timestamp = store.resource_timestamp(resource_name, parent_id).await?;

    let next_token = match (query.limit, page.records.last()) {
        (Some(limit), Some(last)) if page.records.len() == limit => {
            Some(encode_token(&sorting, last))
        }
        _ => None,
    };

    Ok(PollPage {
        records: page.records,
        total: page.total,
        next_token,
        timestamp,
    })
}

/// Capture the last record's sort-key values.
fn encode_token(sorting: &[Sort], last: &Record) -> String {
    let mut position = Map::new();
    for sort in sorting {
        let value = last.field(&sort.field).cloned().unwrap_or(Value::Null);
        position.insert(sort.field.clone(), value);
    }
    URL_SAFE_NO_PAD.encode(Value::Object(position).to_string())
}

fn decode_token(token: &str) -> Result<Map<String, Value>, PollError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| PollError::InvalidToken)?;
    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(position)) => Ok(position),
        _ => Err(PollError::InvalidToken),
    }
}

/// Keyset pagination: records strictly after the captured position, in
/// sort order. One rule per sort key: equal on every earlier key, then
/// strictly beyond on this one. Rules combine with OR.
fn build_pagination_rules(sorting: &[Sort], position: &Map<String, Value>) -> Vec<PaginationRule> {
    let mut rules = Vec::with_capacity(sorting.len());
    for (i, sort) in sorting.iter().enumerate() {
        let Some(value) = position.get(&sort.field) else {
            continue;
        };
        let mut rule: PaginationRule = sorting[..i]
            .iter()
            .filter_map(|earlier| {
                position
                    .get(&earlier.field)
                    .map(|v| Filter::eq(earlier.field.clone(), v.clone()))
            })
            .collect();
        let operator = match sort.direction {
            SortDirection::Ascending => ComparisonOperator::Gt,
            SortDirection::Descending => ComparisonOperator::Lt,
        };
        rule.push(Filter::new(sort.field.clone(), value.clone(), operator));
        rules.push(rule);
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_store::MemoryBackend;
    use silo_test_fixtures::article;

    const RESOURCE: &str = "record";
    const PARENT: &str = "/buckets/blog/collections/articles";

    async fn seeded_store(n: usize) -> MemoryBackend {
        let store = MemoryBackend::new();
        for i in 0..n {
            store
                .create(RESOURCE, PARENT, article("a", i as i64), &[])
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_since_returns_strictly_newer_changes() {
        let store = seeded_store(3).await;
        let checkpoint = store.resource_timestamp(RESOURCE, PARENT).await.unwrap();
        store
            .create(RESOURCE, PARENT, article("late", 99), &[])
            .await
            .unwrap();

        let query = PollQuery {
            since: Some(checkpoint),
            ..PollQuery::default()
        };
        let page = poll_changes(&store, RESOURCE, PARENT, &query).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].field("title"), Some(&serde_json::json!("late")));
        assert!(page.timestamp > checkpoint);
    }

    #[tokio::test]
    async fn test_since_interleaves_tombstones() {
        let store = seeded_store(2).await;
        let checkpoint = store.resource_timestamp(RESOURCE, PARENT).await.unwrap();

        let doomed = store
            .create(RESOURCE, PARENT, article("doomed", 1), &[])
            .await
            .unwrap();
        let survivor = store
            .create(RESOURCE, PARENT, article("survivor", 2), &[])
            .await
            .unwrap();
        store
            .delete(RESOURCE, PARENT, doomed.id().unwrap(), None)
            .await
            .unwrap();

        let query = PollQuery {
            since: Some(checkpoint),
            ..PollQuery::default()
        };
        let page = poll_changes(&store, RESOURCE, PARENT, &query).await.unwrap();
        // The tombstone is the newest change, then the surviving create.
        assert_eq!(page.records.len(), 2);
        assert!(page.records[0].is_tombstone());
        assert_eq!(page.records[0].id(), doomed.id());
        assert_eq!(page.records[1].id(), survivor.id());
    }

    #[tokio::test]
    async fn test_without_since_tombstones_stay_hidden() {
        let store = seeded_store(1).await;
        let doomed = store
            .create(RESOURCE, PARENT, article("doomed", 1), &[])
            .await
            .unwrap();
        store
            .delete(RESOURCE, PARENT, doomed.id().unwrap(), None)
            .await
            .unwrap();

        let page = poll_changes(&store, RESOURCE, PARENT, &PollQuery::default())
            .await
            .unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(!page.records[0].is_tombstone());
    }

    #[tokio::test]
    async fn test_before_bounds_the_window() {
        let store = seeded_store(2).await;
        let cutoff = store.resource_timestamp(RESOURCE, PARENT).await.unwrap();
        store
            .create(RESOURCE, PARENT, article("after", 1), &[])
            .await
            .unwrap();

        let query = PollQuery {
            before: Some(cutoff),
            ..PollQuery::default()
        };
        let page = poll_changes(&store, RESOURCE, PARENT, &query).await.unwrap();
        // The record carrying `cutoff` itself is excluded.
        assert_eq!(page.records.len(), 1);
    }

    #[tokio::test]
    async fn test_token_pages_through_without_gaps_or_repeats() {
        let store = seeded_store(7).await;
        let mut seen = Vec::new();
        let mut token = None;
        loop {
            let query = PollQuery {
                limit: Some(3),
                token: token.take(),
                ..PollQuery::default()
            };
            let page = poll_changes(&store, RESOURCE, PARENT, &query).await.unwrap();
            seen.extend(
                page.records
                    .iter()
                    .map(|r| r.last_modified().unwrap()),
            );
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        assert_eq!(seen.len(), 7);
        // Newest first, no duplicates.
        let mut sorted = seen.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        sorted.dedup();
        assert_eq!(seen, sorted);
    }

    #[tokio::test]
    async fn test_garbage_token_is_rejected() {
        let store = seeded_store(1).await;
        let query = PollQuery {
            token: Some("not!base64!".to_string()),
            ..PollQuery::default()
        };
        let result = poll_changes(&store, RESOURCE, PARENT, &query).await;
        assert!(matches!(result, Err(PollError::InvalidToken)));

        let query = PollQuery {
            token: Some(URL_SAFE_NO_PAD.encode("[1,2,3]")),
            ..PollQuery::default()
        };
        let result = poll_changes(&store, RESOURCE, PARENT, &query).await;
        assert!(matches!(result, Err(PollError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_empty_window_still_reports_the_watermark() {
        let store = seeded_store(2).await;
        let checkpoint = store.resource_timestamp(RESOURCE, PARENT).await.unwrap();

        let query = PollQuery {
            since: Some(checkpoint),
            ..PollQuery::default()
        };
        let page = poll_changes(&store, RESOURCE, PARENT, &query).await.unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.timestamp, checkpoint);
    }

    #[test]
    fn test_pagination_rules_or_of_conjunctions() {
        let sorting = vec![Sort::descending("rating"), Sort::ascending("id")];
        let mut position = Map::new();
        position.insert("rating".to_string(), serde_json::json!(5));
        position.insert("id".to_string(), serde_json::json!("abc"));

        let rules = build_pagination_rules(&sorting, &position);
        assert_eq!(rules.len(), 2);
        // Strictly lower rating...
        assert_eq!(rules[0].len(), 1);
        assert_eq!(rules[0][0].operator, ComparisonOperator::Lt);
        // ...or same rating and a higher id.
        assert_eq!(rules[1].len(), 2);
        assert_eq!(rules[1][0].operator, ComparisonOperator::Eq);
        assert_eq!(rules[1][1].operator, ComparisonOperator::Gt);
    }
}
