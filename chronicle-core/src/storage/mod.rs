//! Call record storage abstraction

mod memory;

pub use memory::InMemoryCallStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::record::{CallRecord, RecordId};

/// Filter and page for [`CallStore::query`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallQuery {
    /// Only records of this function
    pub function_name: Option<String>,

    /// Only failed (`true`) or successful (`false`) calls
    pub has_error: Option<bool>,

    /// Only calls started at or after this instant
    pub since: Option<DateTime<Utc>>,

    /// Page size
    pub limit: usize,

    /// Records to skip, counted after filtering
    pub offset: usize,
}

impl Default for CallQuery {
    fn default() -> Self {
        Self {
            function_name: None,
            has_error: None,
            since: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl CallQuery {
    /// Records of one function
    pub fn function(function_name: impl Into<String>) -> Self {
        Self {
            function_name: Some(function_name.into()),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_error(mut self, has_error: bool) -> Self {
        self.has_error = Some(has_error);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Whether `record` passes the filters (paging aside)
    pub fn matches(&self, record: &CallRecord) -> bool {
        self.function_name
            .as_deref()
            .is_none_or(|name| record.function_name == name)
            && self.has_error.is_none_or(|e| record.has_error() == e)
            && self.since.is_none_or(|since| record.started_at >= since)
    }
}

/// What [`CallStore::delete_all`] removes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    All,
    Function(String),
}

/// Trait for call record storage backends
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Persist a record; ids are unique
    async fn save(&self, record: &CallRecord) -> Result<RecordId>;

    /// Matching records, most recent first
    async fn query(&self, query: &CallQuery) -> Result<Vec<CallRecord>>;

    /// Look up one record by id
    async fn get(&self, id: &str) -> Result<Option<CallRecord>>;

    /// Distinct function names with at least one record, sorted
    async fn list_functions(&self) -> Result<Vec<String>>;

    /// Remove records; returns how many were removed
    async fn delete_all(&self, scope: DeleteScope) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CallError, CallOutcome};
    use chrono::Duration;
    use serde_json::{Map, json};

    fn record(name: &str, minutes_ago: i64, failed: bool) -> CallRecord {
        let outcome = if failed {
            CallOutcome::failure(CallError::new("ValueError", "bad input"))
        } else {
            CallOutcome::success(json!(1))
        };
        CallRecord::new(name, vec![json!(minutes_ago)], Map::new(), outcome)
            .with_started_at(Utc::now() - Duration::minutes(minutes_ago))
    }

    async fn seeded() -> InMemoryCallStore {
        let store = InMemoryCallStore::new();
        for (name, minutes_ago, failed) in [
            ("math.add", 30, false),
            ("math.add", 10, true),
            ("math.add", 20, false),
            ("users.get", 5, false),
        ] {
            store.save(&record(name, minutes_ago, failed)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_query_most_recent_first() {
        let store = seeded().await;

        let records = store.query(&CallQuery::function("math.add")).await.unwrap();
        let ages: Vec<i64> = records.iter().map(|r| r.args[0].as_i64().unwrap()).collect();
        assert_eq!(ages, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_query_filters_and_pages() {
        let store = seeded().await;

        let failed = store
            .query(&CallQuery::function("math.add").with_error(true))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].has_error());

        let page = store
            .query(&CallQuery::function("math.add").with_limit(1).with_offset(1))
            .await
            .unwrap();
        assert_eq!(page[0].args[0], json!(20));

        let recent = store
            .query(&CallQuery::default().since(Utc::now() - Duration::minutes(15)))
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn test_get_and_duplicate_ids() {
        let store = InMemoryCallStore::new();
        let saved = record("f", 1, false);

        let id = store.save(&saved).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(saved.clone()));
        assert!(store.get("missing").await.unwrap().is_none());
        assert!(store.save(&saved).await.is_err());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store = seeded().await;
        assert_eq!(store.list_functions().await.unwrap(), vec!["math.add", "users.get"]);

        let removed = store
            .delete_all(DeleteScope::Function("math.add".to_string()))
            .await
            .unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.list_functions().await.unwrap(), vec!["users.get"]);

        assert_eq!(store.delete_all(DeleteScope::All).await.unwrap(), 1);
        assert!(store.is_empty().await);
    }
}
