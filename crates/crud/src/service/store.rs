//! The store (create) pipeline.

use serde_json::{Map, Value};
use tracing::info;

use super::mutation::{MutationPipeline, finish, overridden};
use crate::adapter::{AdapterRegistry, StorageAdapter};
use crate::config::CrudConfig;
use crate::context::{MutationContext, RequestContext};
use crate::core::{RecordStore, StoreTransaction};
use crate::error::CrudResult;
use crate::field::FieldCatalogue;
use crate::hooks::{HookEvent, HookRegistry};
use crate::model::{ModelSchema, Record};
use crate::types::StoreResponse;

/// Creates records of one record type inside a transaction.
///
/// Input keys outside the fillable allow-list are dropped silently. A
/// failure at any step rolls the transaction back and nothing stays
/// persisted, except on the document engine, whose writes are not undone.
pub struct StoreService<'a> {
    pipeline: MutationPipeline<'a>,
}

impl<'a> StoreService<'a> {
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

    /// Creates one record from raw input and returns it as saved.
    pub async fn store(
        &self,
        input: Map<String, Value>,
        context: &RequestContext,
    ) -> CrudResult<Record> {
        let ctx = self.pipeline.context(&input, context);
        let mut tx = self.pipeline.store.begin().await?;
        let result = self.create(&ctx, tx.as_mut()).await;
        let record = finish(tx, result).await?;

        let model = self.pipeline.model;
        info!(
            model = %model.name,
            id = %record.key(&model.primary_key).unwrap_or(&serde_json::Value::Null),
            request_id = %context.request_id(),
            "record created"
        );
        Ok(record)
    }

    /// Response body for a created record.
    pub fn response(&self, record: &Record) -> StoreResponse {
        let model = self.pipeline.model;
        StoreResponse::new(
            &model.name,
            record.key(&model.primary_key).cloned().unwrap_or(Value::Null),
        )
    }

    async fn create(
        &self,
        ctx: &MutationContext<'_>,
        tx: &mut dyn StoreTransaction,
    ) -> CrudResult<Record> {
        if let Some(hook) = self.pipeline.hooks.store_hook()
            && let Some(record) = hook(ctx, &mut *tx).await?
        {
            overridden(HookEvent::Store, ctx);
            return Ok(record);
        }
        let record = self.pipeline.model.new_record();
        let (record, _) = self.pipeline.fill_and_persist(ctx, record, tx).await?;
        Ok(record)
    }
}
