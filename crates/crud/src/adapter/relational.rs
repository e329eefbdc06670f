//! Behavior shared by the relational adapters.

use serde_json::{Map, Value};

use crate::error::{CrudResult, QueryError};
use crate::field::{FieldCatalogue, FieldDescriptor};
use crate::model::{ModelSchema, Record, RelationDef, RelationKind};
use crate::query::{ListQuery, Selection};

pub(super) fn configure_relations(
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
        // Related keys aggregated into one JSON array column
        return Ok(query.add_selection(Selection::RelationKeys {
            relation: relation.name.clone(),
            alias: field.name.clone(),
        }));
    }

    let query = match relation.kind {
        RelationKind::BelongsTo => {
            query.add_selection(Selection::Column(model.qualify(&relation.foreign_key)))
        }
        _ => query,
    };
    Ok(query.with(relation.name.clone()))
}

pub(super) fn relation_primary_key(relation: &RelationDef) -> String {
    format!("{}.{}", relation.related_table, relation.related_key)
}

pub(super) fn select_columns(model: &ModelSchema, fields: &FieldCatalogue) -> Vec<String> {
    let mut columns = vec![model.qualify(&model.primary_key)];
    for field in fields.index_fields() {
        if field.is_virtual || field.relation.is_some() {
            continue;
        }
        let column = model.qualify(&field.name);
        if !columns.contains(&column) {
            columns.push(column);
        }
    }
    columns
}

pub(super) fn qualified(table: &str, column: &str) -> String {
    if column.contains('.') {
        column.to_string()
    } else {
        format!("{}.{}", table, column)
    }
}

pub(super) fn assign(record: &mut Record, data: Map<String, Value>) {
    for (key, value) in data {
        record.set(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use crate::model::ConnectionInfo;

    fn posts() -> ModelSchema {
        ModelSchema::new("Post", "posts", ConnectionInfo::sqlite())
            .with_relation(RelationDef::belongs_to("category", "categories", "category_id"))
            .with_relation(RelationDef::belongs_to_many(
                "tags", "tags", "post_tag", "post_id", "tag_id",
            ))
    }

    #[test]
    fn test_select_columns_qualified_with_key() {
        let fields = FieldCatalogue::new(vec![
            FieldDescriptor::new("title", FieldType::Text),
            FieldDescriptor::new("score", FieldType::Number).virtual_field(),
            FieldDescriptor::new("tags", FieldType::Relation)
                .relation("tags", RelationKind::BelongsToMany),
            FieldDescriptor::new("body", FieldType::Textarea).hide_on_index(),
        ])
        .unwrap();
        assert_eq!(
            select_columns(&posts(), &fields),
            vec!["posts.id".to_string(), "posts.title".to_string()]
        );
    }

    #[test]
    fn test_configure_to_many_aggregates_keys() {
        let field = FieldDescriptor::new("tags", FieldType::Relation)
            .relation("tags", RelationKind::BelongsToMany);
        let query = configure_relations(ListQuery::new("posts"), &field, &posts()).unwrap();
        assert_eq!(
            query.columns(),
            [Selection::RelationKeys {
                relation: "tags".to_string(),
                alias: "tags".to_string(),
            }]
        );
        assert!(query.eager().is_empty());
    }

    #[test]
    fn test_configure_to_one_eager_loads() {
        let field = FieldDescriptor::new("category", FieldType::Relation)
            .relation("category", RelationKind::BelongsTo);
        let query = configure_relations(ListQuery::new("posts"), &field, &posts()).unwrap();
        assert_eq!(query.eager(), ["category".to_string()]);
        assert_eq!(
            query.columns(),
            [Selection::Column("posts.category_id".to_string())]
        );
    }

    #[test]
    fn test_unknown_relation() {
        let field = FieldDescriptor::new("author", FieldType::Relation)
            .relation("author", RelationKind::BelongsTo);
        assert!(configure_relations(ListQuery::new("posts"), &field, &posts()).is_err());
    }
}
