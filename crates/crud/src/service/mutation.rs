//! Steps shared by the store and update pipelines.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::adapter::{AdapterRegistry, StorageAdapter, fillable};
use crate::config::CrudConfig;
use crate::context::{MutationContext, RequestContext};
use crate::core::{RecordStore, RelationChanges, StoreTransaction};
use crate::error::{CrudResult, QueryError};
use crate::field::FieldCatalogue;
use crate::filter::as_list;
use crate::hooks::{HookEvent, HookRegistry};
use crate::model::{ModelSchema, Record};

/// Record type, store, adapter and hooks of one write pipeline.
pub(crate) struct MutationPipeline<'a> {
    pub(crate) model: &'a ModelSchema,
    pub(crate) fields: &'a FieldCatalogue,
    pub(crate) store: &'a dyn RecordStore,
    pub(crate) adapter: Arc<dyn StorageAdapter>,
    pub(crate) hooks: HookRegistry,
    pub(crate) config: CrudConfig,
}

impl<'a> MutationPipeline<'a> {
    pub(crate) fn new(
        model: &'a ModelSchema,
        fields: &'a FieldCatalogue,
        store: &'a dyn RecordStore,
        adapters: &AdapterRegistry,
    ) -> Self {
        Self {
            model,
            fields,
            store,
            adapter: adapters.resolve(&model.connection),
            hooks: HookRegistry::default(),
            config: CrudConfig::default(),
        }
    }

    pub(crate) fn context<'s>(
        &'s self,
        input: &'s Map<String, Value>,
        context: &'s RequestContext,
    ) -> MutationContext<'s> {
        MutationContext {
            model: self.model,
            fields: self.fields,
            input,
            adapter: self.adapter.as_ref(),
            config: &self.config,
            context,
        }
    }

    /// fillableData, fill, persist and syncRelations, in that order.
    pub(crate) async fn fill_and_persist(
        &self,
        ctx: &MutationContext<'_>,
        record: Record,
        tx: &mut dyn StoreTransaction,
    ) -> CrudResult<(Record, RelationChanges)> {
        let data = match self
            .hooks
            .fillable_data_hook()
            .map(|hook| hook(ctx.input, ctx))
            .transpose()?
            .flatten()
        {
            Some(data) => {
                overridden(HookEvent::FillableData, ctx);
                data
            }
            None => self
                .adapter
                .process_fillable_data(ctx.input.clone(), self.fields),
        };

        let attributes = self.without_to_many(&data);
        let filled = match self
            .hooks
            .fill_hook()
            .map(|hook| hook(&record, &attributes, ctx))
            .transpose()?
            .flatten()
        {
            Some(filled) => {
                overridden(HookEvent::Fill, ctx);
                filled
            }
            None => {
                let mut record = record;
                self.adapter
                    .fill_model(&mut record, &attributes, self.model, self.fields);
                record
            }
        };

        let persisted = match self.hooks.persist_hook() {
            Some(hook) => hook(ctx, &filled, &mut *tx).await?,
            None => None,
        };
        let mut record = match persisted {
            Some(record) => {
                overridden(HookEvent::Persist, ctx);
                record
            }
            None => self.persist(filled, &mut *tx).await?,
        };

        let synced = match self.hooks.sync_relations_hook() {
            Some(hook) => hook(ctx, &mut record, &data, &mut *tx).await?,
            None => None,
        };
        let relations = match synced {
            Some(changes) => {
                overridden(HookEvent::SyncRelations, ctx);
                changes
            }
            None => self.sync_relations(&mut record, &data, tx).await?,
        };

        Ok((record, relations))
    }

    fn without_to_many(&self, data: &Map<String, Value>) -> Map<String, Value> {
        let mut attributes = data.clone();
        for field in self.fields.to_many_relations() {
            attributes.remove(&field.name);
        }
        attributes
    }

    async fn persist(&self, mut record: Record, tx: &mut dyn StoreTransaction) -> CrudResult<Record> {
        if self.model.timestamps && (!record.exists() || record.is_dirty()) {
            let now = self.adapter.timestamp(Utc::now());
            if !record.exists() {
                record.set(self.config.created_at_column.clone(), now.clone());
            }
            record.set(self.config.updated_at_column.clone(), now);
        }
        tx.save(self.model, &mut record).await?;
        Ok(record)
    }

    async fn sync_relations(
        &self,
        record: &mut Record,
        data: &Map<String, Value>,
        tx: &mut dyn StoreTransaction,
    ) -> CrudResult<RelationChanges> {
        let mut changes = RelationChanges::new();
        for field in self.fields.to_many_relations() {
            let (Some(raw), Some(descriptor)) = (data.get(&field.name), &field.relation) else {
                continue;
            };
            if !field.is_fillable() || fillable::guards(self.model, &field.name) {
                debug!(model = %self.model.name, field = %field.name, "skipping sync of non-writable relation");
                continue;
            }
            let relation =
                self.model
                    .relation(&descriptor.name)
                    .ok_or_else(|| QueryError::UnknownRelation {
                        model: self.model.name.clone(),
                        relation: descriptor.name.clone(),
                    })?;

            let keys = relation_keys(raw, &descriptor.key);
            let sync = tx.sync_relation(self.model, &mut *record, relation, &keys).await?;
            debug!(
                model = %self.model.name,
                relation = %relation.name,
                attached = sync.attached.len(),
                detached = sync.detached.len(),
                "relation synced"
            );
            changes.insert(field.name.clone(), sync);
        }
        Ok(changes)
    }
}

/// Related keys named by a relation input value. Objects contribute their
/// `key` member; nulls are dropped, so `null` and `[]` both clear the relation.
pub(crate) fn relation_keys(raw: &Value, key: &str) -> Vec<Value> {
    as_list(raw)
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(mut object) => object.remove(key),
            other => Some(other),
        })
        .filter(|value| !value.is_null())
        .collect()
}

/// Commits on success; on failure rolls back and returns the original error.
pub(crate) async fn finish<T>(
    tx: Box<dyn StoreTransaction>,
    result: CrudResult<T>,
) -> CrudResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback after failed write also failed");
            }
            Err(err)
        }
    }
}

pub(crate) fn overridden(event: HookEvent, ctx: &MutationContext<'_>) {
    debug!(event = %event, request_id = %ctx.context.request_id(), "stage overridden by hook");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_relation_keys() {
        assert_eq!(
            relation_keys(&json!([1, {"id": 2}, {"name": "x"}, null]), "id"),
            vec![json!(1), json!(2)]
        );
        assert_eq!(relation_keys(&json!("a"), "id"), vec![json!("a")]);
        assert!(relation_keys(&Value::Null, "id").is_empty());
    }
}
