//! Record type descriptions.

use serde::{Deserialize, Serialize};

use crate::model::Record;
use crate::query::{Condition, ListQuery, TrashedMode};

/// Identifies the connection a record type is stored on.
///
/// The `driver` string is what storage adapters probe to decide whether they
/// can serve a record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Connection name as configured by the application.
    pub name: String,
    /// Driver identifier (`sqlite`, `pgsql`, `mongodb`, ...).
    pub driver: String,
}

impl ConnectionInfo {
    /// Creates connection info with the given name and driver.
    pub fn new(name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: driver.into(),
        }
    }

    /// Connection info for a SQLite database.
    pub fn sqlite() -> Self {
        Self::new("sqlite", "sqlite")
    }

    /// Connection info for a PostgreSQL database.
    pub fn postgres() -> Self {
        Self::new("pgsql", "pgsql")
    }

    /// Connection info for a document database.
    pub fn mongodb() -> Self {
        Self::new("mongodb", "mongodb")
    }
}

/// The kind of an association between two record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    /// This record holds the foreign key of exactly one related record.
    BelongsTo,
    /// Exactly one related record holds this record's key.
    HasOne,
    /// Many related records hold this record's key.
    HasMany,
    /// Many related records linked through a pivot table or an embedded key array.
    BelongsToMany,
}

impl RelationKind {
    /// Returns `true` for collection-valued associations.
    pub fn is_to_many(&self) -> bool {
        matches!(self, RelationKind::HasMany | RelationKind::BelongsToMany)
    }
}

/// Pivot table linking two record types in a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotTable {
    /// Pivot table name.
    pub table: String,
    /// Pivot column holding the parent key.
    pub foreign_pivot_key: String,
    /// Pivot column holding the related key.
    pub related_pivot_key: String,
}

/// A relation accessor declared on a record type.
///
/// `foreign_key` is interpreted by kind:
///
/// | Kind | `foreign_key` |
/// |------|---------------|
/// | `BelongsTo` | column on this record |
/// | `HasOne` / `HasMany` | column on the related record |
/// | `BelongsToMany` with pivot | unused (see [`PivotTable`]) |
/// | `BelongsToMany` without pivot | embedded key array on this record |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Accessor name.
    pub name: String,
    /// Relation kind.
    pub kind: RelationKind,
    /// Table or collection of the related record type.
    pub related_table: String,
    /// Primary key of the related record type.
    pub related_key: String,
    /// Foreign key column, see the type docs.
    pub foreign_key: String,
    /// Pivot table for relational many-to-many relations.
    pub pivot: Option<PivotTable>,
}

impl RelationDef {
    /// Declares a to-one relation whose key lives on this record.
    pub fn belongs_to(
        name: impl Into<String>,
        related_table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::BelongsTo,
            related_table: related_table.into(),
            related_key: "id".to_string(),
            foreign_key: foreign_key.into(),
            pivot: None,
        }
    }

    /// Declares a to-one relation whose key lives on the related record.
    pub fn has_one(
        name: impl Into<String>,
        related_table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            kind: RelationKind::HasOne,
            ..Self::belongs_to(name, related_table, foreign_key)
        }
    }

    /// Declares a to-many relation whose key lives on the related records.
    pub fn has_many(
        name: impl Into<String>,
        related_table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            kind: RelationKind::HasMany,
            ..Self::belongs_to(name, related_table, foreign_key)
        }
    }

    /// Declares a many-to-many relation through a pivot table.
    pub fn belongs_to_many(
        name: impl Into<String>,
        related_table: impl Into<String>,
        pivot_table: impl Into<String>,
        foreign_pivot_key: impl Into<String>,
        related_pivot_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::BelongsToMany,
            related_table: related_table.into(),
            related_key: "id".to_string(),
            foreign_key: String::new(),
            pivot: Some(PivotTable {
                table: pivot_table.into(),
                foreign_pivot_key: foreign_pivot_key.into(),
                related_pivot_key: related_pivot_key.into(),
            }),
        }
    }

    /// Declares a many-to-many relation stored as an embedded key array.
    pub fn embeds_keys(
        name: impl Into<String>,
        related_collection: impl Into<String>,
        local_array_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::BelongsToMany,
            related_table: related_collection.into(),
            related_key: "_id".to_string(),
            foreign_key: local_array_key.into(),
            pivot: None,
        }
    }

    /// Overrides the related primary key.
    pub fn with_related_key(mut self, key: impl Into<String>) -> Self {
        self.related_key = key.into();
        self
    }
}

/// Describes one record type: where it lives and what may be written to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSchema {
    /// Record type name, used in errors and log fields.
    pub name: String,
    /// Table or collection name.
    pub table: String,
    /// Primary key column.
    pub primary_key: String,
    /// Connection the record type is stored on.
    pub connection: ConnectionInfo,
    /// Explicit fillable declaration (may be empty).
    #[serde(default)]
    pub fillable: Vec<String>,
    /// Guarded declaration (may be empty, `*` guards everything).
    #[serde(default)]
    pub guarded: Vec<String>,
    /// Declared relation accessors.
    #[serde(default)]
    pub relations: Vec<RelationDef>,
    /// Whether saves stamp creation and modification timestamps.
    #[serde(default = "default_true")]
    pub timestamps: bool,
    /// Whether deletions are soft (marker column) rather than physical.
    #[serde(default)]
    pub soft_deletes: bool,
    /// Soft-delete marker column.
    #[serde(default = "default_deleted_at_column")]
    pub deleted_at_column: String,
}

fn default_true() -> bool {
    true
}

fn default_deleted_at_column() -> String {
    "deleted_at".to_string()
}

impl ModelSchema {
    /// Creates a schema with an `id` primary key on the given connection.
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        connection: ConnectionInfo,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            connection,
            fillable: Vec::new(),
            guarded: Vec::new(),
            relations: Vec::new(),
            timestamps: true,
            soft_deletes: false,
            deleted_at_column: default_deleted_at_column(),
        }
    }

    /// Sets the primary key column.
    pub fn with_primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    /// Sets the explicit fillable declaration.
    pub fn with_fillable<I, S>(mut self, fillable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fillable = fillable.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the guarded declaration.
    pub fn with_guarded<I, S>(mut self, guarded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.guarded = guarded.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a relation accessor.
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Enables or disables timestamps.
    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Enables soft deletes.
    pub fn with_soft_deletes(mut self) -> Self {
        self.soft_deletes = true;
        self
    }

    /// Enables soft deletes on a custom marker column.
    pub fn with_soft_delete_column(mut self, column: impl Into<String>) -> Self {
        self.soft_deletes = true;
        self.deleted_at_column = column.into();
        self
    }

    /// Condition restricting a query to the given soft-delete scope, if the
    /// record type soft deletes at all.
    pub fn trashed_condition(&self, mode: TrashedMode) -> Option<Condition> {
        if !self.soft_deletes {
            return None;
        }
        match mode {
            TrashedMode::Exclude => Some(Condition::Null {
                column: self.deleted_at_column.clone(),
                negated: false,
            }),
            TrashedMode::Only => Some(Condition::Null {
                column: self.deleted_at_column.clone(),
                negated: true,
            }),
            TrashedMode::With => None,
        }
    }

    /// Looks up a relation accessor by name.
    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Qualifies a column with the table name.
    pub fn qualify(&self, column: &str) -> String {
        format!("{}.{}", self.table, column)
    }

    /// Returns `true` when the guarded list is the universal wildcard.
    pub fn is_totally_guarded(&self) -> bool {
        self.guarded.iter().any(|g| g == "*")
    }

    /// Query-builder entry point for this record type.
    pub fn new_query(&self) -> ListQuery {
        ListQuery::new(&self.table)
    }

    /// Creates a fresh, unsaved record.
    pub fn new_record(&self) -> Record {
        Record::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_kinds() {
        assert!(RelationKind::HasMany.is_to_many());
        assert!(RelationKind::BelongsToMany.is_to_many());
        assert!(!RelationKind::BelongsTo.is_to_many());
        assert!(!RelationKind::HasOne.is_to_many());
    }

    #[test]
    fn test_schema_lookup_and_qualify() {
        let schema = ModelSchema::new("Post", "posts", ConnectionInfo::sqlite())
            .with_relation(RelationDef::belongs_to("category", "categories", "category_id"))
            .with_relation(RelationDef::belongs_to_many(
                "tags", "tags", "post_tag", "post_id", "tag_id",
            ));

        assert_eq!(schema.qualify("title"), "posts.title");
        assert_eq!(schema.relation("tags").unwrap().kind, RelationKind::BelongsToMany);
        assert!(schema.relation("author").is_none());
    }

    #[test]
    fn test_wildcard_guard() {
        let schema =
            ModelSchema::new("Post", "posts", ConnectionInfo::sqlite()).with_guarded(["*"]);
        assert!(schema.is_totally_guarded());
    }

    #[test]
    fn test_trashed_condition() {
        let plain = ModelSchema::new("Post", "posts", ConnectionInfo::sqlite());
        assert!(plain.trashed_condition(TrashedMode::Only).is_none());

        let soft = plain.with_soft_deletes();
        assert_eq!(
            soft.trashed_condition(TrashedMode::Only),
            Some(Condition::Null {
                column: "deleted_at".to_string(),
                negated: true,
            })
        );
        assert!(soft.trashed_condition(TrashedMode::With).is_none());
    }

    #[test]
    fn test_schema_deserialize_defaults() {
        let schema: ModelSchema = serde_json::from_value(serde_json::json!({
            "name": "Post",
            "table": "posts",
            "primary_key": "id",
            "connection": {"name": "main", "driver": "sqlite"}
        }))
        .unwrap();
        assert!(schema.timestamps);
        assert!(!schema.soft_deletes);
        assert!(schema.fillable.is_empty());
    }
}
