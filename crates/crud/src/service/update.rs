//! The update pipeline.

use serde_json::{Map, Value, json};
use tracing::info;

use super::mutation::{MutationPipeline, finish, overridden};
use crate::adapter::{AdapterRegistry, StorageAdapter};
use crate::config::CrudConfig;
use crate::context::{MutationContext, RequestContext};
use crate::core::{RecordStore, StoreTransaction, key_text};
use crate::error::{CrudError, CrudResult};
use crate::field::FieldCatalogue;
use crate::hooks::{HookEvent, HookRegistry};
use crate::model::{ModelSchema, Record, RelationKind};
use crate::types::UpdateResponse;

/// Result of an update: the saved record and what changed.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// Record as saved.
    pub record: Record,
    /// Changed attributes with their new values, and for each synced
    /// relation its `attached` and `detached` keys.
    pub changes: Map<String, Value>,
}

/// Updates records of one record type inside a transaction.
pub struct UpdateService<'a> {
    pipeline: MutationPipeline<'a>,
}

impl<'a> UpdateService<'a> {
    /// Creates a service, selecting the adapter for the record type's
    /// connection.
    pub fn new(
        model: &'a ModelSchema,
        fields: &'a FieldCatalogue,
        store: &'a dyn RecordStore,
        adapters: &AdapterRegistry,
    ) -> Self {
        Self {
            pipeline: MutationPipeline::new(model, fields, store, adapters),
        }
    }

    /// Sets the stage overrides for this request.
    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.pipeline.hooks = hooks;
        self
    }

    /// Sets the pipeline configuration.
    pub fn with_config(mut self, config: CrudConfig) -> Self {
        self.pipeline.config = config;
        self
    }

    /// The selected adapter.
    pub fn adapter(&self) -> &dyn StorageAdapter {
        self.pipeline.adapter.as_ref()
    }

    /// Loads the record with key `id` and applies raw input to it.
    ///
    /// The lookup honours the context's soft-delete scope. A missing record
    /// is a `NotFound` error and nothing is written.
    pub async fn update(
        &self,
        input: Map<String, Value>,
        id: &Value,
        context: &RequestContext,
    ) -> CrudResult<UpdateOutcome> {
        let ctx = self.pipeline.context(&input, context);
        let mut tx = self.pipeline.store.begin().await?;
        let result = self.modify(&ctx, id, tx.as_mut()).await;
        let outcome = finish(tx, result).await?;

        info!(
            model = %self.pipeline.model.name,
            id = %key_text(id),
            changed = outcome.changes.len(),
            request_id = %context.request_id(),
            "record updated"
        );
        Ok(outcome)
    }

    /// Response body for an update.
    pub fn response(&self, id: &Value, outcome: &UpdateOutcome) -> UpdateResponse {
        UpdateResponse::new(
            &self.pipeline.model.name,
            id.clone(),
            outcome.changes.clone(),
        )
    }

    async fn modify(
        &self,
        ctx: &MutationContext<'_>,
        id: &Value,
        tx: &mut dyn StoreTransaction,
    ) -> CrudResult<UpdateOutcome> {
        let model = self.pipeline.model;
        let existing = tx
            .find(model, id, ctx.context.trashed())
            .await?
            .ok_or_else(|| CrudError::not_found(&model.name, key_text(id)))?;
        let before = existing.attributes().clone();

        if let Some(hook) = self.pipeline.hooks.update_hook()
            && let Some(record) = hook(ctx, &existing, &mut *tx).await?
        {
            overridden(HookEvent::Update, ctx);
            let changes = self.attribute_changes(&before, &record);
            return Ok(UpdateOutcome { record, changes });
        }

        let (record, relations) = self.pipeline.fill_and_persist(ctx, existing, tx).await?;
        let mut changes = self.attribute_changes(&before, &record);
        // Embedded key arrays are reported as relation changes only
        for name in relations.keys() {
            if let Some(column) = self.embedded_keys_column(name) {
                changes.remove(column);
            }
        }
        for (name, sync) in relations {
            if !sync.is_empty() {
                changes.insert(
                    name,
                    json!({"attached": sync.attached, "detached": sync.detached}),
                );
            }
        }
        Ok(UpdateOutcome { record, changes })
    }

    fn embedded_keys_column(&self, field: &str) -> Option<&str> {
        let descriptor = self.pipeline.fields.get(field)?.relation.as_ref()?;
        let relation = self.pipeline.model.relation(&descriptor.name)?;
        (relation.kind == RelationKind::BelongsToMany && relation.pivot.is_none())
            .then_some(relation.foreign_key.as_str())
    }

    fn attribute_changes(&self, before: &Map<String, Value>, after: &Record) -> Map<String, Value> {
        let updated_at = &self.pipeline.config.updated_at_column;
        after
            .attributes()
            .iter()
            .filter(|(key, value)| *key != updated_at && before.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}
