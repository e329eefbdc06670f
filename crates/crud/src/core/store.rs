//! Record store traits.
//!
//! A [`RecordStore`] executes what an adapter compiled. Writes always go
//! through a [`StoreTransaction`] obtained from [`RecordStore::begin`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CrudResult;
use crate::model::{ModelSchema, Record, RelationDef};
use crate::query::{CompiledQuery, TrashedMode};
use crate::types::{PageRequest, Paginated};

/// Keys added to and removed from a relation by one synchronization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncChanges {
    /// Keys newly linked.
    pub attached: Vec<Value>,
    /// Keys unlinked.
    pub detached: Vec<Value>,
}

impl SyncChanges {
    /// Whether the synchronization changed nothing.
    pub fn is_empty(&self) -> bool {
        self.attached.is_empty() && self.detached.is_empty()
    }

    /// Computes the difference between the linked keys and the wanted keys.
    ///
    /// Keys compare by their canonical text, so `1` and `"1"` are the same
    /// key. Duplicates in `wanted` are ignored.
    pub fn diff(current: &[Value], wanted: &[Value]) -> Self {
        let current_keys: Vec<String> = current.iter().map(key_text).collect();
        let wanted_keys: Vec<String> = wanted.iter().map(key_text).collect();

        let mut attached = Vec::new();
        let mut seen = Vec::new();
        for (value, key) in wanted.iter().zip(&wanted_keys) {
            if !current_keys.contains(key) && !seen.contains(key) {
                attached.push(value.clone());
            }
            seen.push(key.clone());
        }
        let detached = current
            .iter()
            .zip(&current_keys)
            .filter(|(_, key)| !wanted_keys.contains(key))
            .map(|(value, _)| value.clone())
            .collect();

        Self { attached, detached }
    }
}

/// Canonical text of a key value.
pub fn key_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Keys in input order with duplicates by [`key_text`] removed.
pub fn unique_keys(keys: &[Value]) -> Vec<Value> {
    let mut unique: Vec<Value> = Vec::new();
    for key in keys {
        if !unique.iter().any(|k| key_text(k) == key_text(key)) {
            unique.push(key.clone());
        }
    }
    unique
}

/// Relation synchronization results keyed by relation field name.
pub type RelationChanges = BTreeMap<String, SyncChanges>;

/// Executes compiled listing queries and opens write transactions.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns a human-readable name for this store.
    fn backend_name(&self) -> &'static str;

    /// Fetches one page of a compiled listing query, with the total count of
    /// matching records.
    async fn paginate(
        &self,
        model: &ModelSchema,
        query: &CompiledQuery,
        page: PageRequest,
    ) -> CrudResult<Paginated<Record>>;

    /// Looks up a record by primary key within a soft-delete scope.
    async fn find(
        &self,
        model: &ModelSchema,
        id: &Value,
        trashed: TrashedMode,
    ) -> CrudResult<Option<Record>>;

    /// Opens a write transaction.
    async fn begin(&self) -> CrudResult<Box<dyn StoreTransaction>>;
}

/// An open write transaction.
///
/// Dropping a transaction without calling [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) logs a warning; relational stores roll back.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Looks up a record by primary key inside the transaction.
    async fn find(
        &mut self,
        model: &ModelSchema,
        id: &Value,
        trashed: TrashedMode,
    ) -> CrudResult<Option<Record>>;

    /// Inserts the record if it does not exist yet, otherwise writes its
    /// dirty attributes. On return the record is clean and carries its key.
    async fn save(&mut self, model: &ModelSchema, record: &mut Record) -> CrudResult<()>;

    /// Makes the relation link exactly `keys`, adding and removing links.
    ///
    /// A relation stored on the record itself, such as an embedded key
    /// array, is written to `record` as well; syncing it fails with
    /// `NotFound` when the record is no longer stored.
    async fn sync_relation(
        &mut self,
        model: &ModelSchema,
        record: &mut Record,
        relation: &RelationDef,
        keys: &[Value],
    ) -> CrudResult<SyncChanges>;

    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> CrudResult<()>;

    /// Rolls back the transaction.
    async fn rollback(self: Box<Self>) -> CrudResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff() {
        let changes = SyncChanges::diff(&[json!(1), json!(2)], &[json!("2"), json!(3), json!(3)]);
        assert_eq!(changes.attached, vec![json!(3)]);
        assert_eq!(changes.detached, vec![json!(1)]);
    }

    #[test]
    fn test_diff_unchanged() {
        assert!(SyncChanges::diff(&[json!("a")], &[json!("a")]).is_empty());
    }

    #[test]
    fn test_unique_keys_by_text() {
        assert_eq!(
            unique_keys(&[json!(1), json!("1"), json!("b"), json!(1)]),
            vec![json!(1), json!("b")]
        );
    }
}
