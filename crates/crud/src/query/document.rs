//! Document-engine compilation of listing queries.
//!
//! Produces Mongo-style filter documents. Dotted column names address
//! nested fields; table qualification is stripped because collections have
//! no column namespace.

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::{CrudResult, QueryError};
use crate::model::{ModelSchema, RelationKind};

use super::{Condition, ListQuery, Operator, Selection, SortDirection};

/// A join resolved by the document engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lookup {
    /// Collection to join.
    pub from: String,
    /// Field on the parent document.
    pub local_field: String,
    /// Field on the joined documents.
    pub foreign_field: String,
    /// Output field name.
    #[serde(rename = "as")]
    pub as_field: String,
    /// Whether the output is a single document rather than an array.
    pub single: bool,
}

/// A compiled document-engine query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentQuery {
    /// Collection name.
    pub collection: String,
    /// Filter document.
    pub filter: Value,
    /// Sort terms in priority order.
    pub sort: Vec<(String, SortDirection)>,
    /// Projected fields; empty means the whole document.
    pub projection: Vec<String>,
    /// Joins to resolve on the fetched page.
    pub lookups: Vec<Lookup>,
    /// Embedded key arrays also exposed under their field name, as
    /// `(stored field, alias)` pairs.
    pub key_aliases: Vec<(String, String)>,
}

impl DocumentQuery {
    /// Copies embedded key arrays under their field aliases.
    pub fn apply_aliases(&self, document: &mut Map<String, Value>) {
        for (field, alias) in &self.key_aliases {
            if field == alias {
                continue;
            }
            let value = document.get(field).cloned().unwrap_or(Value::Array(Vec::new()));
            document.insert(alias.clone(), value);
        }
    }
}

/// Escapes regex metacharacters so a search term matches literally.
pub fn escape_regex(term: &str) -> String {
    regex::escape(term)
}

/// Compiles listing queries for the document engine.
pub struct DocumentCompiler<'a> {
    model: &'a ModelSchema,
}

impl<'a> DocumentCompiler<'a> {
    /// Creates a compiler for the given record type.
    pub fn new(model: &'a ModelSchema) -> Self {
        Self { model }
    }

    /// Compiles the query.
    pub fn compile(&self, query: &ListQuery) -> CrudResult<DocumentQuery> {
        let mut clauses = Vec::new();
        for condition in query.conditions() {
            clauses.push(self.condition(condition)?);
        }
        let filter = match clauses.len() {
            0 => json!({}),
            1 => clauses.remove(0),
            _ => json!({ "$and": clauses }),
        };

        let mut projection = Vec::new();
        let mut key_aliases = Vec::new();
        for selection in query.columns() {
            match selection {
                Selection::Column(column) => {
                    let field = self.field(column);
                    if !projection.contains(&field) {
                        projection.push(field);
                    }
                }
                Selection::RelationKeys { relation, alias } => {
                    // Embedded key arrays are part of the document itself
                    if let Some(def) = self.model.relation(relation)
                        && def.pivot.is_none()
                        && !def.foreign_key.is_empty()
                    {
                        if !projection.contains(&def.foreign_key) {
                            projection.push(def.foreign_key.clone());
                        }
                        key_aliases.push((def.foreign_key.clone(), alias.clone()));
                    }
                }
            }
        }

        let mut lookups = Vec::new();
        for name in query.eager() {
            let def = self.model.relation(name).ok_or_else(|| QueryError::UnknownRelation {
                model: self.model.name.clone(),
                relation: name.clone(),
            })?;
            let (local_field, foreign_field) = match def.kind {
                RelationKind::BelongsTo | RelationKind::BelongsToMany => {
                    (def.foreign_key.clone(), def.related_key.clone())
                }
                RelationKind::HasOne | RelationKind::HasMany => {
                    (self.model.primary_key.clone(), def.foreign_key.clone())
                }
            };
            if !projection.is_empty() && !projection.contains(&local_field) {
                projection.push(local_field.clone());
            }
            lookups.push(Lookup {
                from: def.related_table.clone(),
                local_field,
                foreign_field,
                as_field: def.name.clone(),
                single: !def.kind.is_to_many(),
            });
        }

        Ok(DocumentQuery {
            collection: self.model.table.clone(),
            filter,
            sort: query
                .orders()
                .iter()
                .map(|o| (self.field(&o.column), o.direction))
                .collect(),
            projection,
            lookups,
            key_aliases,
        })
    }

    fn field(&self, column: &str) -> String {
        let prefix = format!("{}.", self.model.table);
        column.strip_prefix(&prefix).unwrap_or(column).to_string()
    }

    fn condition(&self, condition: &Condition) -> CrudResult<Value> {
        let clause = match condition {
            Condition::In { column, values } => json!({ self.field(column): { "$in": values } }),
            Condition::Between { column, min, max } => {
                json!({ self.field(column): { "$gte": min, "$lte": max } })
            }
            Condition::Contains { column, term } => json!({
                self.field(column): { "$regex": escape_regex(term), "$options": "i" }
            }),
            Condition::Compare { column, op, value } => {
                let op = match op {
                    Operator::Eq => "$eq",
                    Operator::Ne => "$ne",
                    Operator::Gt => "$gt",
                    Operator::Gte => "$gte",
                    Operator::Lt => "$lt",
                    Operator::Lte => "$lte",
                };
                let mut inner = Map::new();
                inner.insert(op.to_string(), value.clone());
                json!({ self.field(column): inner })
            }
            Condition::Null { column, negated } => {
                if *negated {
                    json!({ self.field(column): { "$ne": null } })
                } else {
                    json!({ self.field(column): null })
                }
            }
            Condition::RelationIn {
                relation,
                key: _,
                values,
            } => {
                let def = self.model.relation(relation).ok_or_else(|| QueryError::UnknownRelation {
                    model: self.model.name.clone(),
                    relation: relation.clone(),
                })?;
                match def.kind {
                    RelationKind::BelongsTo | RelationKind::BelongsToMany if def.pivot.is_none() => {
                        json!({ def.foreign_key.clone(): { "$in": values } })
                    }
                    _ => {
                        return Err(QueryError::UnsupportedCondition {
                            backend: "mongodb".to_string(),
                            condition: format!("relation filter over '{}' without embedded keys", relation),
                        }
                        .into());
                    }
                }
            }
            Condition::Any(conditions) => {
                let parts = conditions
                    .iter()
                    .map(|c| self.condition(c))
                    .collect::<CrudResult<Vec<_>>>()?;
                json!({ "$or": parts })
            }
            Condition::All(conditions) => {
                let parts = conditions
                    .iter()
                    .map(|c| self.condition(c))
                    .collect::<CrudResult<Vec<_>>>()?;
                json!({ "$and": parts })
            }
            Condition::Document(filter) => filter.clone(),
            Condition::Sql { sql, .. } => {
                return Err(QueryError::UnsupportedCondition {
                    backend: "mongodb".to_string(),
                    condition: format!("raw SQL '{}'", sql),
                }
                .into());
            }
        };
        Ok(clause)
    }
}
