//! Document store and its transactions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::{RecordStore, StoreTransaction, SyncChanges, key_text, unique_keys};
use crate::error::{CrudError, CrudResult, QueryError};
use crate::model::{ModelSchema, Record, RelationDef, RelationKind, path};
use crate::query::document::DocumentCompiler;
use crate::query::{CompiledQuery, DocumentQuery, SortDirection, TrashedMode};
use crate::types::{PageRequest, Paginated};

use super::filter::{matches, sort_order};

type Document = Map<String, Value>;
type Collections = HashMap<String, Vec<Document>>;

const BACKEND_NAME: &str = "memory";

/// An in-process document store.
///
/// Cloning is cheap; clones share the same collections.
///
/// ```
/// use helios_crud::backends::memory::MemoryStore;
/// use serde_json::json;
///
/// let store = MemoryStore::new();
/// let ids = store.insert_many("people", vec![json!({"name": "Ada"})]).unwrap();
/// assert_eq!(store.documents("people").len(), 1);
/// assert_eq!(store.documents("people")[0]["_id"], ids[0]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<Collections>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts documents directly, assigning an `_id` where missing.
    /// Returns the ids in input order.
    pub fn insert_many(&self, collection: &str, documents: Vec<Value>) -> CrudResult<Vec<Value>> {
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            let Value::Object(mut document) = document else {
                return Err(QueryError::InvalidParameter {
                    parameter: collection.to_string(),
                    message: "documents must be JSON objects".to_string(),
                }
                .into());
            };
            let id = document
                .get("_id")
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or_else(new_id);
            document.insert("_id".to_string(), id.clone());
            target.push(document);
            ids.push(id);
        }
        Ok(ids)
    }

    /// Snapshot of a collection's documents.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn unsupported(query: &CompiledQuery) -> crate::error::CrudError {
        QueryError::UnsupportedQuery {
            backend: BACKEND_NAME.to_string(),
            kind: query.kind().to_string(),
        }
        .into()
    }
}

fn new_id() -> Value {
    Value::String(Uuid::new_v4().to_string())
}

fn find_in(
    collections: &Collections,
    model: &ModelSchema,
    id: &Value,
    trashed: TrashedMode,
) -> CrudResult<Option<Record>> {
    let mut query = model.new_query();
    if let Some(condition) = model.trashed_condition(trashed) {
        query = query.filter(condition);
    }
    let query = query.where_eq(model.primary_key.clone(), id.clone());
    let compiled = DocumentCompiler::new(model).compile(&query)?;

    Ok(collections
        .get(&compiled.collection)
        .and_then(|docs| docs.iter().find(|doc| matches(doc, &compiled.filter)))
        .cloned()
        .map(Record::from_storage))
}

fn run_query(collections: &Collections, query: &DocumentQuery, page: PageRequest) -> Paginated<Record> {
    let empty = Vec::new();
    let docs = collections.get(&query.collection).unwrap_or(&empty);

    let mut hits: Vec<&Document> = docs.iter().filter(|doc| matches(doc, &query.filter)).collect();
    let total = hits.len() as u64;

    if !query.sort.is_empty() {
        hits.sort_by(|a, b| {
            query
                .sort
                .iter()
                .map(|(field, direction)| {
                    let ordering = sort_order(path::get_in(a, field), path::get_in(b, field));
                    match direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                })
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
    let limit = usize::try_from(page.limit()).unwrap_or(usize::MAX);

    let data = hits
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|doc| {
            let mut projected = project(doc, &query.projection);
            query.apply_aliases(&mut projected);
            let mut record = Record::from_storage(projected);
            for lookup in &query.lookups {
                let local = path::get_in(doc, &lookup.local_field);
                let related = collections.get(&lookup.from).map(Vec::as_slice).unwrap_or_default();
                let joined: Vec<Value> = related
                    .iter()
                    .filter(|candidate| {
                        keys_match(local, path::get_in(candidate, &lookup.foreign_field))
                    })
                    .map(|candidate| Value::Object(candidate.clone()))
                    .collect();
                let value = if lookup.single {
                    joined.into_iter().next().unwrap_or(Value::Null)
                } else {
                    Value::Array(joined)
                };
                record.set_relation(lookup.as_field.clone(), value);
            }
            record
        })
        .collect();

    Paginated::new(data, total, page)
}

fn project(doc: &Document, projection: &[String]) -> Document {
    if projection.is_empty() {
        return doc.clone();
    }
    let mut out = Map::new();
    if let Some(id) = doc.get("_id") {
        out.insert("_id".to_string(), id.clone());
    }
    for field in projection {
        if let Some(value) = path::get_in(doc, field) {
            path::set_in(&mut out, field, value.clone());
        }
    }
    out
}

fn keys_match(local: Option<&Value>, foreign: Option<&Value>) -> bool {
    let (Some(local), Some(foreign)) = (local, foreign) else {
        return false;
    };
    if foreign.is_null() {
        return false;
    }
    let foreign = key_text(foreign);
    match local {
        Value::Array(items) => items.iter().any(|item| key_text(item) == foreign),
        Value::Null => false,
        other => key_text(other) == foreign,
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn paginate(
        &self,
        _model: &ModelSchema,
        query: &CompiledQuery,
        page: PageRequest,
    ) -> CrudResult<Paginated<Record>> {
        let CompiledQuery::Document(document) = query else {
            return Err(Self::unsupported(query));
        };
        debug!(collection = %document.collection, filter = %document.filter, "running document query");
        Ok(run_query(&self.collections.read(), document, page))
    }

    async fn find(
        &self,
        model: &ModelSchema,
        id: &Value,
        trashed: TrashedMode,
    ) -> CrudResult<Option<Record>> {
        find_in(&self.collections.read(), model, id, trashed)
    }

    async fn begin(&self) -> CrudResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            collections: Arc::clone(&self.collections),
            writes: 0,
            finished: false,
        }))
    }
}

/// A write transaction on a [`MemoryStore`].
///
/// The document engine has no multi-document atomicity: writes apply
/// immediately and [`rollback`](StoreTransaction::rollback) cannot undo
/// them. It only logs what was left behind.
pub struct MemoryTransaction {
    collections: Arc<RwLock<Collections>>,
    writes: usize,
    finished: bool,
}

impl MemoryTransaction {
    fn position(docs: &[Document], key_field: &str, key: &Value) -> Option<usize> {
        let wanted = key_text(key);
        docs.iter().position(|doc| {
            doc.get(key_field)
                .is_some_and(|v| !v.is_null() && key_text(v) == wanted)
        })
    }

    fn sync_embedded(
        &mut self,
        model: &ModelSchema,
        record: &mut Record,
        relation: &RelationDef,
        keys: &[Value],
    ) -> CrudResult<SyncChanges> {
        let id = record_key(model, record)?;
        let mut collections = self.collections.write();
        let docs = collections.entry(model.table.clone()).or_default();
        let index = Self::position(docs, &model.primary_key, &id)
            .ok_or_else(|| CrudError::not_found(&model.name, key_text(&id)))?;

        let current = match docs[index].get(&relation.foreign_key) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        let changes = SyncChanges::diff(&current, keys);

        let keys = Value::Array(unique_keys(keys));
        docs[index].insert(relation.foreign_key.clone(), keys.clone());
        drop(collections);
        self.writes += 1;

        record.set_stored(relation.foreign_key.clone(), keys);
        Ok(changes)
    }

    fn sync_has_many(
        &mut self,
        model: &ModelSchema,
        record: &Record,
        relation: &RelationDef,
        keys: &[Value],
    ) -> CrudResult<SyncChanges> {
        let id = record_key(model, record)?;
        let id_text = key_text(&id);
        let mut collections = self.collections.write();
        let related = collections.entry(relation.related_table.clone()).or_default();

        let current: Vec<Value> = related
            .iter()
            .filter(|doc| {
                doc.get(&relation.foreign_key)
                    .is_some_and(|fk| !fk.is_null() && key_text(fk) == id_text)
            })
            .filter_map(|doc| doc.get(&relation.related_key).cloned())
            .collect();
        let changes = SyncChanges::diff(&current, keys);

        for key in &changes.attached {
            if let Some(index) = Self::position(related, &relation.related_key, key) {
                related[index].insert(relation.foreign_key.clone(), id.clone());
            }
        }
        for key in &changes.detached {
            if let Some(index) = Self::position(related, &relation.related_key, key) {
                related[index].insert(relation.foreign_key.clone(), Value::Null);
            }
        }
        drop(collections);
        self.writes += 1;
        Ok(changes)
    }
}

fn record_key(model: &ModelSchema, record: &Record) -> CrudResult<Value> {
    record.key(&model.primary_key).cloned().ok_or_else(|| {
        QueryError::InvalidParameter {
            parameter: model.primary_key.clone(),
            message: format!("{} must be saved before syncing relations", model.name),
        }
        .into()
    })
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find(
        &mut self,
        model: &ModelSchema,
        id: &Value,
        trashed: TrashedMode,
    ) -> CrudResult<Option<Record>> {
        find_in(&self.collections.read(), model, id, trashed)
    }

    async fn save(&mut self, model: &ModelSchema, record: &mut Record) -> CrudResult<()> {
        if record.key(&model.primary_key).is_none() {
            record.set(model.primary_key.clone(), new_id());
        }
        let id = record_key(model, record)?;

        let mut collections = self.collections.write();
        let docs = collections.entry(model.table.clone()).or_default();
        match Self::position(docs, &model.primary_key, &id) {
            Some(index) => docs[index] = record.attributes().clone(),
            None => docs.push(record.attributes().clone()),
        }
        drop(collections);
        self.writes += 1;

        debug!(collection = %model.table, id = %key_text(&id), "saved document");
        record.sync_original();
        Ok(())
    }

    async fn sync_relation(
        &mut self,
        model: &ModelSchema,
        record: &mut Record,
        relation: &RelationDef,
        keys: &[Value],
    ) -> CrudResult<SyncChanges> {
        match (relation.kind, &relation.pivot) {
            (RelationKind::BelongsToMany, None) => self.sync_embedded(model, record, relation, keys),
            (RelationKind::HasMany, _) => self.sync_has_many(model, record, relation, keys),
            _ => Err(QueryError::UnsupportedCondition {
                backend: BACKEND_NAME.to_string(),
                condition: format!("sync of {:?} relation '{}'", relation.kind, relation.name),
            }
            .into()),
        }
    }

    async fn commit(mut self: Box<Self>) -> CrudResult<()> {
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> CrudResult<()> {
        self.finished = true;
        if self.writes > 0 {
            warn!(
                writes = self.writes,
                "document engine cannot roll back; writes already applied are kept"
            );
        }
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                writes = self.writes,
                "document transaction dropped without commit or rollback; writes are kept"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConnectionInfo;
    use serde_json::json;

    fn people() -> ModelSchema {
        ModelSchema::new("Person", "people", ConnectionInfo::mongodb())
            .with_primary_key("_id")
            .with_soft_deletes()
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_many(
                "people",
                vec![
                    json!({"_id": "a", "name": "Ada", "age": 36, "deleted_at": null}),
                    json!({"_id": "b", "name": "Bob", "age": 20, "deleted_at": null}),
                    json!({"_id": "c", "name": "Cy", "age": 50, "deleted_at": {"$date": "2024-01-01T00:00:00Z"}}),
                ],
            )
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_paginate_filters_sorts_and_counts() {
        let store = seeded();
        let model = people();
        let query = model
            .new_query()
            .filter(model.trashed_condition(TrashedMode::Exclude).unwrap())
            .order_by("age", SortDirection::Desc);
        let compiled = CompiledQuery::Document(DocumentCompiler::new(&model).compile(&query).unwrap());

        let page = store
            .paginate(&model, &compiled, PageRequest::new(1, 1))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.last_page, 2);
        assert_eq!(page.data[0].get("name"), Some(&json!("Ada")));
    }

    #[tokio::test]
    async fn test_find_respects_trashed_scope() {
        let store = seeded();
        let model = people();
        assert!(store.find(&model, &json!("c"), TrashedMode::Exclude).await.unwrap().is_none());
        assert!(store.find(&model, &json!("c"), TrashedMode::Only).await.unwrap().is_some());
        assert!(store.find(&model, &json!("a"), TrashedMode::Only).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rollback_keeps_applied_writes() {
        let store = seeded();
        let model = people();

        let mut tx = store.begin().await.unwrap();
        let mut record = Record::new();
        record.set("name", json!("Dee"));
        tx.save(&model, &mut record).await.unwrap();
        assert!(record.exists());
        assert_eq!(store.documents("people").len(), 4);

        tx.rollback().await.unwrap();
        assert_eq!(store.documents("people").len(), 4);
    }

    #[tokio::test]
    async fn test_sync_embedded_keys() {
        let store = seeded();
        let model = people().with_relation(RelationDef::embeds_keys("tags", "tags", "tag_ids"));
        let relation = model.relation("tags").unwrap().clone();

        let mut tx = store.begin().await.unwrap();
        let mut record = tx
            .find(&model, &json!("a"), TrashedMode::Exclude)
            .await
            .unwrap()
            .unwrap();
        let changes = tx
            .sync_relation(&model, &mut record, &relation, &[json!("t1"), json!("t2"), json!("t1")])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(changes.attached, vec![json!("t1"), json!("t2")]);
        assert_eq!(store.documents("people")[0]["tag_ids"], json!(["t1", "t2"]));
        assert_eq!(record.get("tag_ids"), Some(&json!(["t1", "t2"])));
        assert!(!record.is_dirty());
    }

    #[tokio::test]
    async fn test_sync_embedded_keys_of_missing_document() {
        let store = seeded();
        let model = people().with_relation(RelationDef::embeds_keys("tags", "tags", "tag_ids"));
        let relation = model.relation("tags").unwrap().clone();

        let mut record = Record::from_storage(
            json!({"_id": "gone", "name": "Ghost"}).as_object().unwrap().clone(),
        );
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .sync_relation(&model, &mut record, &relation, &[json!("t1")])
            .await
            .unwrap_err();
        tx.rollback().await.unwrap();

        assert!(err.is_not_found());
        assert_eq!(record.get("tag_ids"), None);
        assert_eq!(store.documents("people").len(), 3);
    }

    #[tokio::test]
    async fn test_sql_query_is_rejected() {
        let store = MemoryStore::new();
        let model = people();
        let compiled = CompiledQuery::Sql(
            crate::query::sql::SqlCompiler::new(crate::query::SqlDialect::Sqlite, &model, "sqlite")
                .compile(&model.new_query())
                .unwrap(),
        );
        let err = store
            .paginate(&model, &compiled, PageRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
    }
}
