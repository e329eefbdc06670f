//! Storage adapters.
//!
//! A [`StorageAdapter`] normalizes everything engine-specific that the
//! pipelines need: relation loading, relation and date filters, the listing
//! projection, input normalization, filling records and compiling the final
//! query. Adapters are stateless and shared freely between requests.
//!
//! | Adapter | Driver | Engine |
//! |---------|--------|--------|
//! | [`DocumentAdapter`] | `mongodb` | nested documents |
//! | [`PostgresAdapter`] | `pgsql` | relational |
//! | [`SqliteAdapter`] | `sqlite` | relational (fallback) |
//!
//! [`AdapterRegistry`] picks the adapter for a connection.

mod document;
pub mod fillable;
mod postgres;
mod registry;
mod relational;
mod sqlite;

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::{CrudResult, QueryError};
use crate::field::{FieldCatalogue, FieldDescriptor};
use crate::filter::{DateRange, RelationalFilter};
use crate::model::{ConnectionInfo, ModelSchema, Record, RelationDef};
use crate::query::{CompiledQuery, ListQuery};

pub use document::DocumentAdapter;
pub use postgres::PostgresAdapter;
pub use registry::AdapterRegistry;
pub use sqlite::SqliteAdapter;

/// Engine-specific query and fill behavior.
pub trait StorageAdapter: Send + Sync + fmt::Debug {
    /// Identifies the adapter.
    fn driver_name(&self) -> &'static str;

    /// Whether this adapter handles the connection.
    fn supports(&self, connection: &ConnectionInfo) -> bool;

    /// Adds what is needed to list the relation of a relation-bearing field.
    fn configure_relations(
        &self,
        query: ListQuery,
        field: &FieldDescriptor,
        model: &ModelSchema,
    ) -> CrudResult<ListQuery>;

    /// Key reference of the related record used by relation filters.
    fn relation_primary_key(&self, relation: &RelationDef) -> String;

    /// Restricts the query to records linked to any of the filter's keys.
    fn handle_many_to_many_filter(
        &self,
        query: ListQuery,
        model: &ModelSchema,
        filter: &RelationalFilter,
    ) -> CrudResult<ListQuery> {
        let relation = model
            .relation(&filter.relation)
            .ok_or_else(|| QueryError::UnknownRelation {
                model: model.name.clone(),
                relation: filter.relation.clone(),
            })?;
        let key = self.relation_primary_key(relation);
        Ok(query.where_relation_in(&relation.name, key, filter.values.clone()))
    }

    /// Restricts `column` to an inclusive day range.
    fn apply_date_filter(
        &self,
        query: ListQuery,
        column: &str,
        range: DateRange,
    ) -> CrudResult<ListQuery>;

    /// Initial listing projection.
    fn select_columns(&self, model: &ModelSchema, fields: &FieldCatalogue) -> Vec<String>;

    /// Normalizes raw input before fillable resolution.
    fn process_fillable_data(
        &self,
        input: Map<String, Value>,
        fields: &FieldCatalogue,
    ) -> Map<String, Value>;

    /// Resolves the writable part of `data` and applies it to the record.
    fn fill_model(
        &self,
        record: &mut Record,
        data: &Map<String, Value>,
        model: &ModelSchema,
        fields: &FieldCatalogue,
    ) {
        let allowed = fillable::resolve(model, fields, data);
        tracing::trace!(
            model = %model.name,
            offered = data.len(),
            kept = allowed.len(),
            "resolved fillable input"
        );
        self.assign(record, allowed);
    }

    /// Applies already-filtered data to the record.
    fn assign(&self, record: &mut Record, data: Map<String, Value>);

    /// Value stored in timestamp columns.
    fn timestamp(&self, at: DateTime<Utc>) -> Value {
        Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    /// Compiles the query for this engine.
    fn get_sql(&self, query: &ListQuery, model: &ModelSchema) -> CrudResult<CompiledQuery>;
}
