//! In-memory call store

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{CallQuery, CallStore, DeleteScope};
use crate::error::{ChronicleError, Result};
use crate::record::{CallRecord, RecordId};

/// Store keeping records in insertion order behind an async lock
#[derive(Debug, Clone, Default)]
pub struct InMemoryCallStore {
    records: Arc<RwLock<Vec<CallRecord>>>,
}

impl InMemoryCallStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CallStore for InMemoryCallStore {
    async fn save(&self, record: &CallRecord) -> Result<RecordId> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id == record.id) {
            return Err(ChronicleError::storage(format!(
                "record {} already exists",
                record.id
            )));
        }
        records.push(record.clone());
        Ok(record.id.clone())
    }

    async fn query(&self, query: &CallQuery) -> Result<Vec<CallRecord>> {
        let records = self.records.read().await;

        // Newest insertions first, so equal start times keep that order
        let mut matching: Vec<&CallRecord> =
            records.iter().rev().filter(|r| query.matches(r)).collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        Ok(matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<CallRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn list_functions(&self) -> Result<Vec<String>> {
        let records = self.records.read().await;
        let names: BTreeSet<&str> = records.iter().map(|r| r.function_name.as_str()).collect();
        Ok(names.into_iter().map(str::to_string).collect())
    }

    async fn delete_all(&self, scope: DeleteScope) -> Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        match scope {
            DeleteScope::All => records.clear(),
            DeleteScope::Function(name) => records.retain(|r| r.function_name != name),
        }
        Ok(before - records.len())
    }
}
