//! Per-invocation context.
//!
//! A [`RequestContext`] is created fresh for every pipeline invocation and
//! discarded when it returns. It replaces any process-wide state: nothing in
//! this crate caches per-request data outside of it.
//!
//! [`ListingContext`] and [`MutationContext`] are the borrowed views that
//! pipeline stages and hooks receive.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::adapter::StorageAdapter;
use crate::config::CrudConfig;
use crate::field::FieldCatalogue;
use crate::model::ModelSchema;
use crate::query::TrashedMode;
use crate::request::ListingRequest;

/// Request-scoped state threaded through one pipeline invocation.
///
/// ```
/// use helios_crud::context::RequestContext;
/// use helios_crud::query::TrashedMode;
///
/// let ctx = RequestContext::new().with_trashed(TrashedMode::Only);
/// assert_eq!(ctx.trashed(), TrashedMode::Only);
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    started_at: DateTime<Utc>,
    trashed: TrashedMode,
}

impl RequestContext {
    /// Creates a context with a new request id.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            started_at: Utc::now(),
            trashed: TrashedMode::default(),
        }
    }

    /// Sets the soft-delete scope used for record lookups.
    pub fn with_trashed(mut self, trashed: TrashedMode) -> Self {
        self.trashed = trashed;
        self
    }

    /// Identifier used to correlate log lines of one invocation.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// When the invocation started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Soft-delete scope used for record lookups.
    pub fn trashed(&self) -> TrashedMode {
        self.trashed
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// What a listing stage or listing hook can see.
#[derive(Clone, Copy)]
pub struct ListingContext<'a> {
    /// Record type being listed.
    pub model: &'a ModelSchema,
    /// Field catalogue of the record type.
    pub fields: &'a FieldCatalogue,
    /// Parsed listing request.
    pub request: &'a ListingRequest,
    /// Adapter selected for the record type's connection.
    pub adapter: &'a dyn StorageAdapter,
    /// Pipeline configuration.
    pub config: &'a CrudConfig,
    /// Request-scoped state.
    pub context: &'a RequestContext,
}

/// What a write stage or write hook can see.
#[derive(Clone, Copy)]
pub struct MutationContext<'a> {
    /// Record type being written.
    pub model: &'a ModelSchema,
    /// Field catalogue of the record type.
    pub fields: &'a FieldCatalogue,
    /// Raw input as received, before normalization or filtering.
    pub input: &'a Map<String, Value>,
    /// Adapter selected for the record type's connection.
    pub adapter: &'a dyn StorageAdapter,
    /// Pipeline configuration.
    pub config: &'a CrudConfig,
    /// Request-scoped state.
    pub context: &'a RequestContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contexts_are_distinct() {
        let a = RequestContext::new();
        let b = RequestContext::new();
        assert_ne!(a.request_id(), b.request_id());
        assert_eq!(a.trashed(), TrashedMode::Exclude);
    }
}
