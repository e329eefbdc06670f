//! The listing pipeline.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::adapter::{AdapterRegistry, StorageAdapter};
use crate::config::CrudConfig;
use crate::context::{ListingContext, RequestContext};
use crate::core::RecordStore;
use crate::error::CrudResult;
use crate::field::{FieldCatalogue, FilterType};
use crate::filter::{DateRange, FilterRequest, OriginalFilter, as_list, slider_bounds};
use crate::hooks::{HookEvent, HookRegistry};
use crate::model::{ModelSchema, Record};
use crate::query::{CompiledQuery, Condition, ListQuery, SortDirection};
use crate::request::ListingRequest;
use crate::types::{PageRequest, Paginated};

/// Builds and runs listing queries for one record type.
///
/// ```
/// use helios_crud::adapter::AdapterRegistry;
/// use helios_crud::backends::memory::MemoryStore;
/// use helios_crud::context::RequestContext;
/// use helios_crud::field::{FieldCatalogue, FieldDescriptor, FieldType};
/// use helios_crud::model::{ConnectionInfo, ModelSchema};
/// use helios_crud::request::ListingRequest;
/// use helios_crud::service::ListingService;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let model = ModelSchema::new("Person", "people", ConnectionInfo::mongodb())
///     .with_primary_key("_id");
/// let fields = FieldCatalogue::new(vec![FieldDescriptor::new("name", FieldType::Text)])?;
/// let store = MemoryStore::new();
/// store.insert_many("people", vec![serde_json::json!({"name": "Ada"})])?;
///
/// let adapters = AdapterRegistry::default();
/// let page = ListingService::new(&model, &fields, &store, &adapters)
///     .list(&ListingRequest::new(), &RequestContext::new())
///     .await?;
/// assert_eq!(page.total, 1);
/// # Ok(())
/// # }
/// ```
pub struct ListingService<'a> {
    model: &'a ModelSchema,
    fields: &'a FieldCatalogue,
    store: &'a dyn RecordStore,
    adapter: Arc<dyn StorageAdapter>,
    hooks: HookRegistry,
    config: CrudConfig,
}

impl<'a> ListingService<'a> {
    /// Creates a service, selecting the adapter for the record type's
    /// connection.
    pub fn new(
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

    /// Sets the stage overrides for this request.
    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Sets the pipeline configuration.
    pub fn with_config(mut self, config: CrudConfig) -> Self {
        self.config = config;
        self
    }

    /// The selected adapter.
    pub fn adapter(&self) -> &dyn StorageAdapter {
        self.adapter.as_ref()
    }

    fn context<'s>(
        &'s self,
        request: &'s ListingRequest,
        context: &'s RequestContext,
    ) -> ListingContext<'s> {
        ListingContext {
            model: self.model,
            fields: self.fields,
            request,
            adapter: self.adapter.as_ref(),
            config: &self.config,
            context,
        }
    }

    /// Runs every query-building stage up to and including modifyQuery.
    pub fn build_query(
        &self,
        request: &ListingRequest,
        context: &RequestContext,
    ) -> CrudResult<ListQuery> {
        let ctx = self.context(request, context);
        self.build(&ctx)
    }

    /// Compiles the query the listing would run, for inspection.
    pub fn to_sql(
        &self,
        request: &ListingRequest,
        context: &RequestContext,
    ) -> CrudResult<CompiledQuery> {
        let query = self.build_query(request, context)?;
        self.adapter.get_sql(&query, self.model)
    }

    /// Runs the whole pipeline and returns one page of records.
    pub async fn list(
        &self,
        request: &ListingRequest,
        context: &RequestContext,
    ) -> CrudResult<Paginated<Record>> {
        let ctx = self.context(request, context);
        let query = self.build(&ctx)?;

        if let Some(hook) = self.hooks.paginate_hook()
            && let Some(page) = hook(&query, &ctx, self.store).await?
        {
            debug!(event = %HookEvent::Paginate, request_id = %context.request_id(), "stage overridden by hook");
            return Ok(page);
        }

        let page = PageRequest::new(
            request.page.unwrap_or(1),
            self.config.page_size(request.result),
        );
        let compiled = self.adapter.get_sql(&query, self.model)?;
        let result = self.store.paginate(self.model, &compiled, page).await?;
        debug!(
            model = %self.model.name,
            request_id = %context.request_id(),
            total = result.total,
            page = result.current_page,
            "listing page fetched"
        );
        Ok(result)
    }

    fn build(&self, ctx: &ListingContext<'_>) -> CrudResult<ListQuery> {
        let hooks = &self.hooks;
        let query = hooks.run_query_stage(HookEvent::InitQuery, self.model.new_query(), ctx, |q| {
            Ok(self.init_query(q, ctx))
        })?;
        let query = hooks.run_query_stage(HookEvent::Select, query, ctx, |q| {
            Ok(q.select(self.adapter.select_columns(self.model, self.fields)))
        })?;
        let query = hooks.run_query_stage(HookEvent::Relations, query, ctx, |q| self.relations(q))?;
        let query = hooks.run_query_stage(HookEvent::Search, query, ctx, |q| Ok(self.search(q, ctx)))?;
        let query = hooks.run_query_stage(HookEvent::Filters, query, ctx, |q| self.filters(q, ctx))?;
        let query = hooks.run_query_stage(HookEvent::Sort, query, ctx, |q| Ok(self.sort(q, ctx)))?;
        hooks.run_query_stage(HookEvent::ModifyQuery, query, ctx, Ok)
    }

    fn init_query(&self, query: ListQuery, ctx: &ListingContext<'_>) -> ListQuery {
        let trashed = ctx.request.trashed;
        let query = query.trashed_mode(trashed);
        match self.model.trashed_condition(trashed) {
            Some(condition) => query.filter(condition),
            None => query,
        }
    }

    fn relations(&self, mut query: ListQuery) -> CrudResult<ListQuery> {
        for field in self.fields.index_fields().filter(|f| f.relation.is_some()) {
            query = self.adapter.configure_relations(query, field, self.model)?;
        }
        Ok(query)
    }

    fn search(&self, query: ListQuery, ctx: &ListingContext<'_>) -> ListQuery {
        let Some(term) = ctx.request.search_term() else {
            return query;
        };
        let conditions: Vec<Condition> = self
            .fields
            .searchable()
            .map(|field| Condition::Contains {
                column: field.name.clone(),
                term: term.to_string(),
            })
            .collect();
        if conditions.is_empty() {
            return query;
        }
        query.where_any(conditions)
    }

    fn filters(&self, mut query: ListQuery, ctx: &ListingContext<'_>) -> CrudResult<ListQuery> {
        let filters = FilterRequest::parse(&ctx.request.filters, self.fields);
        if filters.is_empty() {
            return Ok(query);
        }
        debug!(
            original = filters.original.len(),
            relational = filters.relational.len(),
            custom = filters.custom_query.len(),
            "applying filters"
        );

        for filter in &filters.original {
            query = self.original_filter(query, filter)?;
        }
        for filter in &filters.relational {
            query = self
                .adapter
                .handle_many_to_many_filter(query, self.model, filter)?;
        }
        for filter in &filters.custom_query {
            query = filter.query.apply(query, &filter.value)?;
        }
        Ok(query)
    }

    fn original_filter(&self, query: ListQuery, filter: &OriginalFilter) -> CrudResult<ListQuery> {
        let column = filter.column.as_str();
        Ok(match filter.filter_type {
            FilterType::Select => query.where_in(column, as_list(&filter.value)),
            FilterType::Slider => {
                let (min, max) = slider_bounds(column, &filter.value)?;
                query.where_between(column, min, max)
            }
            FilterType::DatePicker => {
                let range = DateRange::parse(column, &filter.value)?;
                self.adapter.apply_date_filter(query, column, range)?
            }
            FilterType::Search => {
                let term = match &filter.value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                query.where_contains(column, term)
            }
        })
    }

    fn sort(&self, query: ListQuery, ctx: &ListingContext<'_>) -> ListQuery {
        let requested = ctx.request.sorter.as_ref().filter(|sorter| {
            let sortable = self.fields.get(&sorter.field).is_some_and(|f| f.sortable);
            if !sortable {
                debug!(field = %sorter.field, "dropping sort on non-sortable field");
            }
            sortable
        });
        match requested {
            Some(sorter) => query.order_by(sorter.field.clone(), sorter.direction()),
            None => query.order_by(self.config.created_at_column.clone(), SortDirection::Desc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryStore;
    use crate::field::{FieldDescriptor, FieldType};
    use crate::model::{ConnectionInfo, RelationKind};
    use crate::query::TrashedMode;
    use serde_json::json;

    fn people() -> (ModelSchema, FieldCatalogue) {
        let model = ModelSchema::new("Person", "people", ConnectionInfo::sqlite()).with_soft_deletes();
        let fields = FieldCatalogue::new(vec![
            FieldDescriptor::new("name", FieldType::Text).searchable().sortable(),
            FieldDescriptor::new("email", FieldType::Text).searchable(),
            FieldDescriptor::new("status", FieldType::Select).filter(FilterType::Select),
            FieldDescriptor::new("age", FieldType::Number).filter(FilterType::Slider),
            FieldDescriptor::new("tags", FieldType::Relation)
                .relation("tags", RelationKind::BelongsToMany)
                .filter(FilterType::Select),
        ])
        .unwrap();
        let model = model.with_relation(crate::model::RelationDef::belongs_to_many(
            "tags", "tags", "person_tag", "person_id", "tag_id",
        ));
        (model, fields)
    }

    #[test]
    fn test_stage_defaults() {
        let (model, fields) = people();
        let store = MemoryStore::new();
        let adapters = AdapterRegistry::default();
        let service = ListingService::new(&model, &fields, &store, &adapters);
        assert_eq!(service.adapter().driver_name(), "sqlite");

        let request = ListingRequest::new()
            .with_search("ada")
            .with_filter("status", json!(["active"]))
            .with_filter("age", json!([18, 30]))
            .with_filter("tags", json!([1]));
        let query = service.build_query(&request, &RequestContext::new()).unwrap();

        // trashed scope, search, status, age, tags
        assert_eq!(query.conditions().len(), 5);
        assert_eq!(query.orders()[0].column, "created_at");
        assert_eq!(query.orders()[0].direction, SortDirection::Desc);
        assert_eq!(query.trashed(), TrashedMode::Exclude);
    }

    #[test]
    fn test_requested_sort() {
        let (model, fields) = people();
        let store = MemoryStore::new();
        let adapters = AdapterRegistry::default();
        let service = ListingService::new(&model, &fields, &store, &adapters);

        let request = ListingRequest::new().with_sorter("name", "ascend");
        let query = service.build_query(&request, &RequestContext::new()).unwrap();
        assert_eq!(query.orders().len(), 1);
        assert_eq!(query.orders()[0].column, "name");
        assert_eq!(query.orders()[0].direction, SortDirection::Asc);
    }

    #[test]
    fn test_sort_on_non_sortable_field_dropped() {
        let (model, fields) = people();
        let store = MemoryStore::new();
        let adapters = AdapterRegistry::default();
        let service = ListingService::new(&model, &fields, &store, &adapters);

        for field in ["email", "password"] {
            let request = ListingRequest::new().with_sorter(field, "ascend");
            let query = service.build_query(&request, &RequestContext::new()).unwrap();
            assert_eq!(query.orders().len(), 1);
            assert_eq!(query.orders()[0].column, "created_at");
            assert_eq!(query.orders()[0].direction, SortDirection::Desc);
        }
    }

    #[test]
    fn test_invalid_slider_is_rejected() {
        let (model, fields) = people();
        let store = MemoryStore::new();
        let adapters = AdapterRegistry::default();
        let service = ListingService::new(&model, &fields, &store, &adapters);

        let request = ListingRequest::new().with_filter("age", json!(5));
        let err = service.build_query(&request, &RequestContext::new()).unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn test_to_sql_compiles_for_selected_adapter() {
        let (model, fields) = people();
        let store = MemoryStore::new();
        let adapters = AdapterRegistry::default();
        let service = ListingService::new(&model, &fields, &store, &adapters);

        let compiled = service
            .to_sql(&ListingRequest::new(), &RequestContext::new())
            .unwrap();
        assert_eq!(compiled.kind(), "sql");
    }
}
