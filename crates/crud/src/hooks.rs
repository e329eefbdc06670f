//! Per-request stage overrides.
//!
//! A [`HookRegistry`] holds at most one override per [`HookEvent`]. Every
//! pipeline stage asks the registry first:
//!
//! - no hook registered: the default runs
//! - hook returns `Ok(None)`: the default runs
//! - hook returns `Ok(Some(value))`: `value` is the stage result and the
//!   default is never executed
//! - hook returns `Err`: the whole invocation aborts with that error
//!
//! Each event has its own callback type, so a hook cannot be registered for
//! a stage whose shape it does not match. Write-side hooks that touch the
//! store receive the open transaction and return a boxed future.
//!
//! ```
//! use helios_crud::hooks::{HookEvent, HookRegistry};
//! use helios_crud::query::SortDirection;
//!
//! let hooks = HookRegistry::new().on_sort(|query, _ctx| {
//!     Ok(Some(query.clone().order_by("name", SortDirection::Asc)))
//! });
//! assert!(hooks.has(HookEvent::Sort));
//! assert!(!hooks.has(HookEvent::Search));
//! ```

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::context::{ListingContext, MutationContext};
use crate::core::{RecordStore, RelationChanges, StoreTransaction};
use crate::error::CrudResult;
use crate::model::Record;
use crate::query::ListQuery;
use crate::types::Paginated;

/// Names of the overridable stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Base query for the record type.
    InitQuery,
    /// Initial projection.
    Select,
    /// Relation loading.
    Relations,
    /// Free-text search.
    Search,
    /// Filter application.
    Filters,
    /// Ordering.
    Sort,
    /// Final query pass-through.
    ModifyQuery,
    /// Query execution and paging.
    Paginate,
    /// Whole create body (fill, persist, relation sync).
    Store,
    /// Whole update body (fill, persist, relation sync).
    Update,
    /// Input normalization.
    FillableData,
    /// Applying filtered input to the record.
    Fill,
    /// Saving the record.
    Persist,
    /// Relation synchronization.
    SyncRelations,
}

impl HookEvent {
    /// Event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::InitQuery => "onInitQuery",
            HookEvent::Select => "onSelect",
            HookEvent::Relations => "onRelations",
            HookEvent::Search => "onSearch",
            HookEvent::Filters => "onFilters",
            HookEvent::Sort => "onSort",
            HookEvent::ModifyQuery => "onModifyQuery",
            HookEvent::Paginate => "onPaginate",
            HookEvent::Store => "onStore",
            HookEvent::Update => "onUpdate",
            HookEvent::FillableData => "onFillableData",
            HookEvent::Fill => "onFill",
            HookEvent::Persist => "onPersist",
            HookEvent::SyncRelations => "onSyncRelations",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Override of a query-building stage.
pub type QueryHook =
    Arc<dyn Fn(&ListQuery, &ListingContext<'_>) -> CrudResult<Option<ListQuery>> + Send + Sync>;

/// Override of the paginate stage.
pub type PaginateHook = Arc<
    dyn for<'a> Fn(
            &'a ListQuery,
            &'a ListingContext<'a>,
            &'a dyn RecordStore,
        ) -> BoxFuture<'a, CrudResult<Option<Paginated<Record>>>>
        + Send
        + Sync,
>;

/// Override of the whole create body.
pub type StoreHook = Arc<
    dyn for<'a> Fn(
            &'a MutationContext<'a>,
            &'a mut dyn StoreTransaction,
        ) -> BoxFuture<'a, CrudResult<Option<Record>>>
        + Send
        + Sync,
>;

/// Override of the whole update body. Receives the record as loaded.
pub type UpdateHook = Arc<
    dyn for<'a> Fn(
            &'a MutationContext<'a>,
            &'a Record,
            &'a mut dyn StoreTransaction,
        ) -> BoxFuture<'a, CrudResult<Option<Record>>>
        + Send
        + Sync,
>;

/// Override of input normalization.
pub type FillableDataHook = Arc<
    dyn Fn(&Map<String, Value>, &MutationContext<'_>) -> CrudResult<Option<Map<String, Value>>>
        + Send
        + Sync,
>;

/// Override of applying filtered input to the record.
pub type FillHook = Arc<
    dyn Fn(&Record, &Map<String, Value>, &MutationContext<'_>) -> CrudResult<Option<Record>>
        + Send
        + Sync,
>;

/// Override of saving the filled record.
pub type PersistHook = Arc<
    dyn for<'a> Fn(
            &'a MutationContext<'a>,
            &'a Record,
            &'a mut dyn StoreTransaction,
        ) -> BoxFuture<'a, CrudResult<Option<Record>>>
        + Send
        + Sync,
>;

/// Override of relation synchronization. Receives the saved record and the
/// normalized input.
pub type SyncRelationsHook = Arc<
    dyn for<'a> Fn(
            &'a MutationContext<'a>,
            &'a mut Record,
            &'a Map<String, Value>,
            &'a mut dyn StoreTransaction,
        ) -> BoxFuture<'a, CrudResult<Option<RelationChanges>>>
        + Send
        + Sync,
>;

/// Stage overrides for one pipeline invocation.
#[derive(Default, Clone)]
pub struct HookRegistry {
    init_query: Option<QueryHook>,
    select: Option<QueryHook>,
    relations: Option<QueryHook>,
    search: Option<QueryHook>,
    filters: Option<QueryHook>,
    sort: Option<QueryHook>,
    modify_query: Option<QueryHook>,
    paginate: Option<PaginateHook>,
    store: Option<StoreHook>,
    update: Option<UpdateHook>,
    fillable_data: Option<FillableDataHook>,
    fill: Option<FillHook>,
    persist: Option<PersistHook>,
    sync_relations: Option<SyncRelationsHook>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<&str> = self.registered().iter().map(HookEvent::as_str).collect();
        f.debug_struct("HookRegistry")
            .field("registered", &registered)
            .finish()
    }
}

macro_rules! query_hook_setter {
    ($(#[$doc:meta])* $name:ident, $field:ident) => {
        $(#[$doc])*
        pub fn $name<F>(mut self, hook: F) -> Self
        where
            F: Fn(&ListQuery, &ListingContext<'_>) -> CrudResult<Option<ListQuery>>
                + Send
                + Sync
                + 'static,
        {
            self.$field = Some(Arc::new(hook));
            self
        }
    };
}

impl HookRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    query_hook_setter!(
        /// Overrides the base query.
        on_init_query,
        init_query
    );
    query_hook_setter!(
        /// Overrides the initial projection.
        on_select,
        select
    );
    query_hook_setter!(
        /// Overrides relation loading.
        on_relations,
        relations
    );
    query_hook_setter!(
        /// Overrides the free-text search.
        on_search,
        search
    );
    query_hook_setter!(
        /// Overrides filter application.
        on_filters,
        filters
    );
    query_hook_setter!(
        /// Overrides ordering.
        on_sort,
        sort
    );
    query_hook_setter!(
        /// Overrides the final query pass.
        on_modify_query,
        modify_query
    );

    /// Overrides query execution and paging.
    pub fn on_paginate<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(
                &'a ListQuery,
                &'a ListingContext<'a>,
                &'a dyn RecordStore,
            ) -> BoxFuture<'a, CrudResult<Option<Paginated<Record>>>>
            + Send
            + Sync
            + 'static,
    {
        self.paginate = Some(Arc::new(hook));
        self
    }

    /// Overrides the whole create body.
    pub fn on_store<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(
                &'a MutationContext<'a>,
                &'a mut dyn StoreTransaction,
            ) -> BoxFuture<'a, CrudResult<Option<Record>>>
            + Send
            + Sync
            + 'static,
    {
        self.store = Some(Arc::new(hook));
        self
    }

    /// Overrides the whole update body.
    pub fn on_update<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(
                &'a MutationContext<'a>,
                &'a Record,
                &'a mut dyn StoreTransaction,
            ) -> BoxFuture<'a, CrudResult<Option<Record>>>
            + Send
            + Sync
            + 'static,
    {
        self.update = Some(Arc::new(hook));
        self
    }

    /// Overrides input normalization.
    pub fn on_fillable_data<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Map<String, Value>, &MutationContext<'_>) -> CrudResult<Option<Map<String, Value>>>
            + Send
            + Sync
            + 'static,
    {
        self.fillable_data = Some(Arc::new(hook));
        self
    }

    /// Overrides applying filtered input to the record.
    pub fn on_fill<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Record, &Map<String, Value>, &MutationContext<'_>) -> CrudResult<Option<Record>>
            + Send
            + Sync
            + 'static,
    {
        self.fill = Some(Arc::new(hook));
        self
    }

    /// Overrides saving the filled record.
    pub fn on_persist<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(
                &'a MutationContext<'a>,
                &'a Record,
                &'a mut dyn StoreTransaction,
            ) -> BoxFuture<'a, CrudResult<Option<Record>>>
            + Send
            + Sync
            + 'static,
    {
        self.persist = Some(Arc::new(hook));
        self
    }

    /// Overrides relation synchronization.
    pub fn on_sync_relations<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(
                &'a MutationContext<'a>,
                &'a mut Record,
                &'a Map<String, Value>,
                &'a mut dyn StoreTransaction,
            ) -> BoxFuture<'a, CrudResult<Option<RelationChanges>>>
            + Send
            + Sync
            + 'static,
    {
        self.sync_relations = Some(Arc::new(hook));
        self
    }

    /// Whether an override is registered for the event.
    pub fn has(&self, event: HookEvent) -> bool {
        match event {
            HookEvent::Paginate => self.paginate.is_some(),
            HookEvent::Store => self.store.is_some(),
            HookEvent::Update => self.update.is_some(),
            HookEvent::FillableData => self.fillable_data.is_some(),
            HookEvent::Fill => self.fill.is_some(),
            HookEvent::Persist => self.persist.is_some(),
            HookEvent::SyncRelations => self.sync_relations.is_some(),
            query_event => self.query_hook(query_event).is_some(),
        }
    }

    /// Registered events, in pipeline order.
    pub fn registered(&self) -> Vec<HookEvent> {
        [
            HookEvent::InitQuery,
            HookEvent::Select,
            HookEvent::Relations,
            HookEvent::Search,
            HookEvent::Filters,
            HookEvent::Sort,
            HookEvent::ModifyQuery,
            HookEvent::Paginate,
            HookEvent::Store,
            HookEvent::Update,
            HookEvent::FillableData,
            HookEvent::Fill,
            HookEvent::Persist,
            HookEvent::SyncRelations,
        ]
        .into_iter()
        .filter(|event| self.has(*event))
        .collect()
    }

    fn query_hook(&self, event: HookEvent) -> Option<&QueryHook> {
        match event {
            HookEvent::InitQuery => self.init_query.as_ref(),
            HookEvent::Select => self.select.as_ref(),
            HookEvent::Relations => self.relations.as_ref(),
            HookEvent::Search => self.search.as_ref(),
            HookEvent::Filters => self.filters.as_ref(),
            HookEvent::Sort => self.sort.as_ref(),
            HookEvent::ModifyQuery => self.modify_query.as_ref(),
            _ => None,
        }
    }

    /// Runs one query-building stage: the hook's result if it returns one,
    /// otherwise `default`.
    pub fn run_query_stage<D>(
        &self,
        event: HookEvent,
        query: ListQuery,
        ctx: &ListingContext<'_>,
        default: D,
    ) -> CrudResult<ListQuery>
    where
        D: FnOnce(ListQuery) -> CrudResult<ListQuery>,
    {
        if let Some(hook) = self.query_hook(event)
            && let Some(replaced) = hook(&query, ctx)?
        {
            tracing::debug!(event = %event, request_id = %ctx.context.request_id(), "stage overridden by hook");
            return Ok(replaced);
        }
        default(query)
    }

    pub(crate) fn paginate_hook(&self) -> Option<&PaginateHook> {
        self.paginate.as_ref()
    }

    pub(crate) fn store_hook(&self) -> Option<&StoreHook> {
        self.store.as_ref()
    }

    pub(crate) fn update_hook(&self) -> Option<&UpdateHook> {
        self.update.as_ref()
    }

    pub(crate) fn fillable_data_hook(&self) -> Option<&FillableDataHook> {
        self.fillable_data.as_ref()
    }

    pub(crate) fn fill_hook(&self) -> Option<&FillHook> {
        self.fill.as_ref()
    }

    pub(crate) fn persist_hook(&self) -> Option<&PersistHook> {
        self.persist.as_ref()
    }

    pub(crate) fn sync_relations_hook(&self) -> Option<&SyncRelationsHook> {
        self.sync_relations.as_ref()
    }
}
