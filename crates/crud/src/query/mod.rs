//! Engine-neutral listing query.
//!
//! [`ListQuery`] is the value threaded through the listing pipeline. Stages
//! and hooks add projections, relation loads, conditions and ordering to it;
//! a storage adapter finally compiles it into a [`CompiledQuery`] that a
//! record store executes.
//!
//! Most conditions are portable. Adapters may add engine-specific nodes
//! ([`Condition::Sql`], [`Condition::Document`]) that only the matching
//! compiler accepts.
//!
//! ```
//! use helios_crud::query::{ListQuery, SortDirection};
//! use serde_json::json;
//!
//! let query = ListQuery::new("posts")
//!     .select(["posts.id", "posts.title"])
//!     .where_in("status", vec![json!("draft"), json!("published")])
//!     .where_between("views", json!(10), json!(100))
//!     .order_by("created_at", SortDirection::Desc);
//!
//! assert_eq!(query.conditions().len(), 2);
//! ```

pub mod document;
pub mod sql;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use document::{DocumentQuery, Lookup};
pub use sql::{EagerLoad, SqlDialect, SqlFragment, SqlStatement, WriteBuilder};

/// Which soft-deleted records a query sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrashedMode {
    /// Only records that are not soft-deleted.
    #[default]
    Exclude,
    /// Only soft-deleted records.
    Only,
    /// Both.
    With,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortDirection {
    /// SQL keyword for this direction.
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
}

/// One projected item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Selection {
    /// A plain column, bare or table-qualified.
    Column(String),
    /// Keys of a to-many relation aggregated into one JSON array column.
    RelationKeys {
        /// Relation accessor name.
        relation: String,
        /// Output column name.
        alias: String,
    },
}

/// A filter predicate.
// Variant fields are named after the SQL they compile to
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// Column value is one of `values`.
    In { column: String, values: Vec<Value> },
    /// `min <= column <= max`.
    Between { column: String, min: Value, max: Value },
    /// Column contains `term` as a substring (case-insensitive where the engine allows).
    Contains { column: String, term: String },
    /// Binary comparison.
    Compare {
        column: String,
        op: Operator,
        value: Value,
    },
    /// Column is null (or, negated, not null).
    Null { column: String, negated: bool },
    /// A related record's `key` is one of `values`.
    RelationIn {
        relation: String,
        key: String,
        values: Vec<Value>,
    },
    /// Any of the nested conditions holds.
    Any(Vec<Condition>),
    /// All of the nested conditions hold.
    All(Vec<Condition>),
    /// Raw SQL with `?` placeholders, relational engines only.
    Sql { sql: String, bindings: Vec<Value> },
    /// Raw filter document, document engine only.
    Document(Value),
}

/// An ordering term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Column to order by.
    pub column: String,
    /// Direction.
    pub direction: SortDirection,
}

/// The engine-neutral listing query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListQuery {
    table: String,
    columns: Vec<Selection>,
    eager: Vec<String>,
    conditions: Vec<Condition>,
    orders: Vec<OrderBy>,
    trashed: TrashedMode,
}

impl ListQuery {
    /// Creates an empty query over the given table or collection.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// Table or collection name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Projected items.
    pub fn columns(&self) -> &[Selection] {
        &self.columns
    }

    /// Relations to eager load.
    pub fn eager(&self) -> &[String] {
        &self.eager
    }

    /// Conditions, combined with AND.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Ordering terms.
    pub fn orders(&self) -> &[OrderBy] {
        &self.orders
    }

    /// Soft-delete scope.
    pub fn trashed(&self) -> TrashedMode {
        self.trashed
    }

    /// Replaces the projection with plain columns.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns
            .into_iter()
            .map(|c| Selection::Column(c.into()))
            .collect();
        self
    }

    /// Adds one projected item.
    pub fn add_selection(mut self, selection: Selection) -> Self {
        if !self.columns.contains(&selection) {
            self.columns.push(selection);
        }
        self
    }

    /// Eager loads a relation.
    pub fn with(mut self, relation: impl Into<String>) -> Self {
        let relation = relation.into();
        if !self.eager.contains(&relation) {
            self.eager.push(relation);
        }
        self
    }

    /// Adds a condition.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Restricts a column to a set of values.
    pub fn where_in(self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(Condition::In {
            column: column.into(),
            values,
        })
    }

    /// Restricts a column to an inclusive range.
    pub fn where_between(self, column: impl Into<String>, min: Value, max: Value) -> Self {
        self.filter(Condition::Between {
            column: column.into(),
            min,
            max,
        })
    }

    /// Restricts a column to values containing `term`.
    pub fn where_contains(self, column: impl Into<String>, term: impl Into<String>) -> Self {
        self.filter(Condition::Contains {
            column: column.into(),
            term: term.into(),
        })
    }

    /// Compares a column against a value.
    pub fn where_op(self, column: impl Into<String>, op: Operator, value: Value) -> Self {
        self.filter(Condition::Compare {
            column: column.into(),
            op,
            value,
        })
    }

    /// Column equals a value.
    pub fn where_eq(self, column: impl Into<String>, value: Value) -> Self {
        self.where_op(column, Operator::Eq, value)
    }

    /// Column is not null.
    pub fn where_not_null(self, column: impl Into<String>) -> Self {
        self.filter(Condition::Null {
            column: column.into(),
            negated: true,
        })
    }

    /// Any of the given conditions holds.
    pub fn where_any(self, conditions: Vec<Condition>) -> Self {
        self.filter(Condition::Any(conditions))
    }

    /// A related record's key is one of `values`.
    pub fn where_relation_in(
        self,
        relation: impl Into<String>,
        key: impl Into<String>,
        values: Vec<Value>,
    ) -> Self {
        self.filter(Condition::RelationIn {
            relation: relation.into(),
            key: key.into(),
            values,
        })
    }

    /// Adds raw SQL with `?` placeholders.
    pub fn where_sql(self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.filter(Condition::Sql {
            sql: sql.into(),
            bindings,
        })
    }

    /// Adds a raw filter document.
    pub fn where_document(self, filter: Value) -> Self {
        self.filter(Condition::Document(filter))
    }

    /// Appends an ordering term.
    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.orders.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    /// Sets the soft-delete scope.
    pub fn trashed_mode(mut self, mode: TrashedMode) -> Self {
        self.trashed = mode;
        self
    }
}

/// A query compiled for one engine, ready for a record store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "engine", rename_all = "lowercase")]
pub enum CompiledQuery {
    /// Relational statement pair.
    Sql(SqlStatement),
    /// Document engine query.
    Document(DocumentQuery),
}

impl CompiledQuery {
    /// Short name of the query family.
    pub fn kind(&self) -> &'static str {
        match self {
            CompiledQuery::Sql(_) => "sql",
            CompiledQuery::Document(_) => "document",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_accumulates() {
        let query = ListQuery::new("posts")
            .select(["posts.id"])
            .add_selection(Selection::RelationKeys {
                relation: "tags".to_string(),
                alias: "tags".to_string(),
            })
            .with("category")
            .with("category")
            .where_eq("status", json!("draft"))
            .where_not_null("deleted_at")
            .order_by("title", SortDirection::Asc);

        assert_eq!(query.table(), "posts");
        assert_eq!(query.columns().len(), 2);
        assert_eq!(query.eager(), ["category".to_string()]);
        assert_eq!(query.conditions().len(), 2);
        assert_eq!(query.orders()[0].direction, SortDirection::Asc);
    }

    #[test]
    fn test_trashed_default() {
        assert_eq!(ListQuery::new("posts").trashed(), TrashedMode::Exclude);
    }
}
