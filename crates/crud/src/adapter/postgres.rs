//! PostgreSQL adapter.

use serde_json::{Map, Value};

use crate::error::CrudResult;
use crate::field::{FieldCatalogue, FieldDescriptor};
use crate::filter::DateRange;
use crate::model::{ConnectionInfo, ModelSchema, Record, RelationDef};
use crate::query::sql::{SqlCompiler, quote_ident};
use crate::query::{CompiledQuery, ListQuery, SqlDialect};

use super::{StorageAdapter, relational};

const DRIVERS: [&str; 3] = ["pgsql", "postgres", "postgresql"];

/// Adapter for PostgreSQL connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresAdapter;

impl PostgresAdapter {
    /// Creates the adapter.
    pub fn new() -> Self {
        Self
    }
}

impl StorageAdapter for PostgresAdapter {
    fn driver_name(&self) -> &'static str {
        "pgsql"
    }

    fn supports(&self, connection: &ConnectionInfo) -> bool {
        DRIVERS.contains(&connection.driver.as_str())
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
            format!(
                "CAST({0} AS date) >= to_date(?, 'YYYY-MM-DD') AND CAST({0} AS date) <= to_date(?, 'YYYY-MM-DD')",
                column
            ),
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
        SqlCompiler::new(SqlDialect::Postgres, model, "postgres")
            .compile(query)
            .map(CompiledQuery::Sql)
    }
}
