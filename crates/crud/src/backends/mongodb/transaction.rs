//! MongoDB write transactions.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::Database;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document, doc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::{StoreTransaction, SyncChanges, key_text, unique_keys};
use crate::error::{CrudError, CrudResult, QueryError};
use crate::model::{ModelSchema, Record, RelationDef, RelationKind};
use crate::query::TrashedMode;

use super::convert::{key_filter, to_bson, to_document, to_json};
use super::store::{BACKEND_NAME, collection_of, find_record, new_id};

/// A write transaction on a [`MongoStore`](super::MongoStore).
///
/// Writes apply as they are issued. [`rollback`](StoreTransaction::rollback)
/// cannot undo them and only logs what was left behind.
pub struct MongoTransaction {
    database: Database,
    writes: usize,
    finished: bool,
}

impl MongoTransaction {
    pub(crate) fn new(database: Database) -> Self {
        Self {
            database,
            writes: 0,
            finished: false,
        }
    }

    async fn sync_embedded(
        &mut self,
        model: &ModelSchema,
        record: &mut Record,
        relation: &RelationDef,
        keys: &[Value],
    ) -> CrudResult<SyncChanges> {
        let id = saved_key(model, record)?;
        let collection = collection_of(&self.database, &model.table);
        let filter = key_filter(&model.primary_key, &id)?;

        let stored = collection
            .find_one(filter.clone())
            .await?
            .ok_or_else(|| CrudError::not_found(&model.name, key_text(&id)))?;
        let current = match stored.get(&relation.foreign_key) {
            Some(Bson::Array(items)) => items.iter().cloned().map(to_json).collect(),
            _ => Vec::new(),
        };
        let changes = SyncChanges::diff(&current, keys);

        let keys = Value::Array(unique_keys(keys));
        let mut set = Document::new();
        set.insert(relation.foreign_key.clone(), to_bson(keys.clone())?);
        let result = collection.update_one(filter, doc! { "$set": set }).await?;
        if result.matched_count == 0 {
            return Err(CrudError::not_found(&model.name, key_text(&id)));
        }
        self.writes += 1;

        record.set_stored(relation.foreign_key.clone(), keys);
        Ok(changes)
    }

    async fn sync_has_many(
        &mut self,
        model: &ModelSchema,
        record: &Record,
        relation: &RelationDef,
        keys: &[Value],
    ) -> CrudResult<SyncChanges> {
        let id = saved_key(model, record)?;
        let related = collection_of(&self.database, &relation.related_table);

        let owned: Vec<Document> = related
            .find(key_filter(&relation.foreign_key, &id)?)
            .await?
            .try_collect()
            .await?;
        let current: Vec<Value> = owned
            .into_iter()
            .filter_map(|mut document| document.remove(&relation.related_key))
            .map(to_json)
            .collect();
        let changes = SyncChanges::diff(&current, keys);

        if !changes.attached.is_empty() {
            let filter = in_filter(&relation.related_key, &changes.attached)?;
            let mut set = Document::new();
            set.insert(relation.foreign_key.clone(), to_bson(id.clone())?);
            related.update_many(filter, doc! { "$set": set }).await?;
        }
        if !changes.detached.is_empty() {
            let filter = in_filter(&relation.related_key, &changes.detached)?;
            let mut set = Document::new();
            set.insert(relation.foreign_key.clone(), Bson::Null);
            related.update_many(filter, doc! { "$set": set }).await?;
        }
        self.writes += 1;
        Ok(changes)
    }
}

/// Matches any of `keys`; hex strings also match the object id they name.
fn in_filter(field: &str, keys: &[Value]) -> CrudResult<Document> {
    let mut candidates = Vec::with_capacity(keys.len());
    for key in keys {
        candidates.push(to_bson(key.clone())?);
        if let Value::String(text) = key
            && let Ok(oid) = ObjectId::parse_str(text)
        {
            candidates.push(Bson::ObjectId(oid));
        }
    }
    let mut filter = Document::new();
    filter.insert(field, doc! { "$in": candidates });
    Ok(filter)
}

fn saved_key(model: &ModelSchema, record: &Record) -> CrudResult<Value> {
    record.key(&model.primary_key).cloned().ok_or_else(|| {
        QueryError::InvalidParameter {
            parameter: model.primary_key.clone(),
            message: format!("{} must be saved before syncing relations", model.name),
        }
        .into()
    })
}

#[async_trait]
impl StoreTransaction for MongoTransaction {
    async fn find(
        &mut self,
        model: &ModelSchema,
        id: &Value,
        trashed: TrashedMode,
    ) -> CrudResult<Option<Record>> {
        find_record(&self.database, model, id, trashed).await
    }

    async fn save(&mut self, model: &ModelSchema, record: &mut Record) -> CrudResult<()> {
        if record.key(&model.primary_key).is_none() {
            record.set(model.primary_key.clone(), new_id());
        }
        let id = saved_key(model, record)?;
        let collection = collection_of(&self.database, &model.table);

        if record.exists() {
            let dirty = record.dirty();
            if !dirty.is_empty() {
                let filter = key_filter(&model.primary_key, &id)?;
                let result = collection
                    .update_one(filter, doc! { "$set": to_document(dirty)? })
                    .await?;
                if result.matched_count == 0 {
                    return Err(CrudError::not_found(&model.name, key_text(&id)));
                }
                self.writes += 1;
            }
        } else {
            collection.insert_one(to_document(record.attributes().clone())?).await?;
            self.writes += 1;
        }

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
            (RelationKind::BelongsToMany, None) => self.sync_embedded(model, record, relation, keys).await,
            (RelationKind::HasMany, _) => self.sync_has_many(model, record, relation, keys).await,
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
                "mongodb store cannot roll back; writes already applied are kept"
            );
        }
        Ok(())
    }
}

impl Drop for MongoTransaction {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                writes = self.writes,
                "mongodb transaction dropped without commit or rollback; writes are kept"
            );
        }
    }
}
