//! SQLite adapter.

use serde_json::{Map, Value};

use crate::error::CrudResult;
use crate::field::{FieldCatalogue, FieldDescriptor};
use crate::filter::DateRange;
use crate::model::{ConnectionInfo, ModelSchema, Record, RelationDef};
use crate::query::sql::{SqlCompiler, quote_ident};
use crate::query::{CompiledQuery, ListQuery, SqlDialect};

use super::{StorageAdapter, relational};

/// Adapter for SQLite connections; also the fallback for unknown drivers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteAdapter;

impl SqliteAdapter {
    /// Creates the adapter.
    pub fn new() -> Self {
        Self
    }
}

impl StorageAdapter for SqliteAdapter {
    fn driver_name(&self) -> &'static str {
        "sqlite"
    }

    fn supports(&self, connection: &ConnectionInfo) -> bool {
        connection.driver == "sqlite"
    }

    fn configure_relations(
        &self,
        query: ListQuery,
        field: &FieldDescriptor,
        model: &ModelSchema,
    ) -> CrudResult<ListQuery> {
        relational::configure_relations(query, field, model)
    }

    fn relation_primary_key(&self, relation: &RelationDef) -> String {
        relational::relation_primary_key(relation)
    }

    fn apply_date_filter(
        &self,
        query: ListQuery,
        column: &str,
        range: DateRange,
    ) -> CrudResult<ListQuery> {
        let column = quote_ident(&relational::qualified(query.table(), column));
        Ok(query.where_sql(
            format!("date({0}) >= ? AND date({0}) <= ?", column),
            vec![
                Value::String(range.start.to_string()),
                Value::String(range.end.to_string()),
            ],
        ))
    }

    fn select_columns(&self, model: &ModelSchema, fields: &FieldCatalogue) -> Vec<String> {
        relational::select_columns(model, fields)
    }

    fn process_fillable_data(
        &self,
        input: Map<String, Value>,
        _fields: &FieldCatalogue,
    ) -> Map<String, Value> {
        input
    }

    fn assign(&self, record: &mut Record, data: Map<String, Value>) {
        relational::assign(record, data);
    }

    fn get_sql(&self, query: &ListQuery, model: &ModelSchema) -> CrudResult<CompiledQuery> {
        SqlCompiler::new(SqlDialect::Sqlite, model, "sqlite")
            .compile(query)
            .map(CompiledQuery::Sql)
    }
}
