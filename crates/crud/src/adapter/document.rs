//! Document-engine adapter.
//!
//! Documents nest, so filling is selective: per top-level key an array
//! replaces the stored value whole while an object merges into it
//! recursively. Editing one nested sub-object never erases siblings that
//! are absent from the request.
//!
//! To-many relations live in the document as embedded key arrays. Listings
//! return the array under its stored name and under the field name, so a
//! `tags` field over `tag_ids` reads the same as on a relational engine.

use chrono::{DateTime, Days, NaiveTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};

use crate::error::{CrudResult, QueryError};
use crate::field::{FieldCatalogue, FieldDescriptor};
use crate::filter::DateRange;
use crate::model::{ConnectionInfo, ModelSchema, Record, RelationDef, path};
use crate::query::document::DocumentCompiler;
use crate::query::{CompiledQuery, ListQuery, Selection};

use super::StorageAdapter;

/// Adapter for the document engine (`mongodb` driver).
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentAdapter;

impl DocumentAdapter {
    /// Creates the adapter.
    pub fn new() -> Self {
        Self
    }
}

/// Merges `incoming` into `target`: objects merge key by key, anything else
/// replaces.
pub fn merge_into(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => merge_into(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot, incoming) => *slot = incoming,
    }
}

fn day_start(day: chrono::NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

impl StorageAdapter for DocumentAdapter {
    fn driver_name(&self) -> &'static str {
        "mongodb"
    }

    fn supports(&self, connection: &ConnectionInfo) -> bool {
        connection.driver == "mongodb"
    }

    fn configure_relations(
        &self,
        query: ListQuery,
        field: &FieldDescriptor,
        model: &ModelSchema,
    ) -> CrudResult<ListQuery> {
        let Some(descriptor) = &field.relation else {
            return Ok(query);
        };
        let relation = model
            .relation(&descriptor.name)
            .ok_or_else(|| QueryError::UnknownRelation {
                model: model.name.clone(),
                relation: descriptor.name.clone(),
            })?;

        if relation.kind.is_to_many() {
            // Embedded key arrays travel with the document
            Ok(query.add_selection(Selection::RelationKeys {
                relation: relation.name.clone(),
                alias: field.name.clone(),
            }))
        } else {
            Ok(query.with(relation.name.clone()))
        }
    }

    fn relation_primary_key(&self, relation: &RelationDef) -> String {
        relation.related_key.clone()
    }

    fn apply_date_filter(
        &self,
        query: ListQuery,
        column: &str,
        range: DateRange,
    ) -> CrudResult<ListQuery> {
        let after_end = range.end.checked_add_days(Days::new(1)).unwrap_or(range.end);
        let binary = json!({
            column: {
                "$gte": {"$date": day_start(range.start).to_rfc3339_opts(SecondsFormat::Millis, true)},
                "$lt": {"$date": day_start(after_end).to_rfc3339_opts(SecondsFormat::Millis, true)}
            }
        });
        // Records written before dates were stored as BSON dates hold strings
        let legacy = json!({
            column: {
                "$gte": range.start.to_string(),
                "$lt": after_end.to_string()
            }
        });
        Ok(query.where_document(json!({ "$or": [binary, legacy] })))
    }

    fn select_columns(&self, model: &ModelSchema, fields: &FieldCatalogue) -> Vec<String> {
        let mut columns = vec![model.primary_key.clone()];
        for field in fields.index_fields() {
            if field.is_virtual || field.relation.is_some() {
                continue;
            }
            if !columns.contains(&field.name) {
                columns.push(field.name.clone());
            }
        }
        columns
    }

    fn process_fillable_data(
        &self,
        input: Map<String, Value>,
        _fields: &FieldCatalogue,
    ) -> Map<String, Value> {
        path::undot(input)
    }

    fn assign(&self, record: &mut Record, data: Map<String, Value>) {
        for (key, value) in data {
            match value {
                Value::Object(_) => {
                    let mut current = record.get(&key).cloned().unwrap_or(Value::Null);
                    merge_into(&mut current, value);
                    record.set(key, current);
                }
                other => record.set(key, other),
            }
        }
    }

    fn timestamp(&self, at: DateTime<Utc>) -> Value {
        json!({ "$date": at.to_rfc3339_opts(SecondsFormat::Millis, true) })
    }

    fn get_sql(&self, query: &ListQuery, model: &ModelSchema) -> CrudResult<CompiledQuery> {
        DocumentCompiler::new(model)
            .compile(query)
            .map(CompiledQuery::Document)
    }
}
