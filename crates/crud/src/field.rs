//! Field descriptors.
//!
//! A [`FieldCatalogue`] is the ordered list of [`FieldDescriptor`]s a
//! scaffolding layer produces for one record type. The pipelines only read
//! it: which fields are listed, searched, filtered, sorted, written, and
//! which relations are synchronized.
//!
//! Catalogues deserialize from JSON; the custom predicate of a field
//! ([`FilterQuery`]) can only be attached in code.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CrudResult, QueryError};
use crate::model::RelationKind;
use crate::query::ListQuery;

/// Display/input type of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Single-line text.
    #[default]
    Text,
    /// Multi-line text.
    Textarea,
    /// Numeric value.
    Number,
    /// True/false value.
    Boolean,
    /// Date or timestamp.
    Date,
    /// Choice from fixed options.
    Select,
    /// Reference to related records.
    Relation,
    /// Nested structured value.
    Json,
}

/// How a field is filtered in a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterType {
    /// Membership in a set of values.
    Select,
    /// Inclusive two-sided numeric range.
    Slider,
    /// Inclusive day range.
    DatePicker,
    /// Substring match.
    Search,
}

/// Relation metadata carried by a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    /// Accessor name on the record type.
    pub name: String,
    /// Key column of the related record used as the option value.
    #[serde(default = "default_relation_key")]
    pub key: String,
    /// Column of the related record used as the option label.
    #[serde(default)]
    pub field: String,
    /// Relation kind.
    #[serde(rename = "type")]
    pub kind: RelationKind,
}

fn default_relation_key() -> String {
    "id".to_string()
}

type FilterQueryFn = dyn Fn(ListQuery, &Value) -> CrudResult<ListQuery> + Send + Sync;

/// A field-supplied filter predicate, invoked with the query and the raw value.
#[derive(Clone)]
pub struct FilterQuery(Arc<FilterQueryFn>);

impl FilterQuery {
    /// Wraps a predicate callback.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ListQuery, &Value) -> CrudResult<ListQuery> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Applies the predicate.
    pub fn apply(&self, query: ListQuery, raw: &Value) -> CrudResult<ListQuery> {
        (self.0)(query, raw)
    }
}

impl fmt::Debug for FilterQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FilterQuery(..)")
    }
}

/// Metadata describing one attribute of a record type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    /// Attribute name, unique within the catalogue.
    pub name: String,
    /// Display/input type.
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    /// Filter widget, if the field is filterable through one.
    #[serde(default)]
    pub filter_type: Option<FilterType>,
    /// Whether the field can be filtered.
    #[serde(default)]
    pub filterable: bool,
    /// Whether the free-text search covers this field.
    #[serde(default)]
    pub searchable: bool,
    /// Whether the listing can be sorted by this field.
    #[serde(default)]
    pub sortable: bool,
    /// Whether the field may be written; `None` means "not declared".
    #[serde(default)]
    pub fillable: Option<bool>,
    /// Whether the field is computed rather than stored.
    #[serde(rename = "virtual", default)]
    pub is_virtual: bool,
    /// Whether the field holds many related records.
    #[serde(default)]
    pub multiple: bool,
    /// Whether the field appears in the listing projection.
    #[serde(default = "default_true")]
    pub show_on_index: bool,
    /// Request paths written by this field; defaults to the field name.
    #[serde(default)]
    pub request: Vec<String>,
    /// Relation metadata.
    #[serde(default)]
    pub relation: Option<RelationDescriptor>,
    /// Custom filter predicate.
    #[serde(skip)]
    pub filter_query: Option<FilterQuery>,
}

fn default_true() -> bool {
    true
}

impl FieldDescriptor {
    /// Creates a descriptor with every capability switched off.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            filter_type: None,
            filterable: false,
            searchable: false,
            sortable: false,
            fillable: None,
            is_virtual: false,
            multiple: false,
            show_on_index: true,
            request: Vec::new(),
            relation: None,
            filter_query: None,
        }
    }

    /// Marks the field searchable.
    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    /// Marks the field sortable.
    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    /// Marks the field filterable through the given widget.
    pub fn filter(mut self, filter_type: FilterType) -> Self {
        self.filterable = true;
        self.filter_type = Some(filter_type);
        self
    }

    /// Declares the field writable or not.
    pub fn fillable(mut self, fillable: bool) -> Self {
        self.fillable = Some(fillable);
        self
    }

    /// Marks the field virtual (never written).
    pub fn virtual_field(mut self) -> Self {
        self.is_virtual = true;
        self.fillable = Some(false);
        self
    }

    /// Hides the field from the listing projection.
    pub fn hide_on_index(mut self) -> Self {
        self.show_on_index = false;
        self
    }

    /// Sets the request paths written by this field.
    pub fn request_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Attaches relation metadata.
    pub fn relation(mut self, name: impl Into<String>, kind: RelationKind) -> Self {
        self.field_type = FieldType::Relation;
        self.multiple = kind.is_to_many();
        self.relation = Some(RelationDescriptor {
            name: name.into(),
            key: default_relation_key(),
            field: String::new(),
            kind,
        });
        self
    }

    /// Sets the key and label columns of the related record.
    pub fn relation_columns(mut self, key: impl Into<String>, field: impl Into<String>) -> Self {
        if let Some(relation) = self.relation.as_mut() {
            relation.key = key.into();
            relation.field = field.into();
        }
        self
    }

    /// Attaches a custom filter predicate.
    pub fn filter_query<F>(mut self, f: F) -> Self
    where
        F: Fn(ListQuery, &Value) -> CrudResult<ListQuery> + Send + Sync + 'static,
    {
        self.filterable = true;
        self.filter_query = Some(FilterQuery::new(f));
        self
    }

    /// Whether the field may be written. Virtual fields never are.
    pub fn is_fillable(&self) -> bool {
        !self.is_virtual && self.fillable != Some(false)
    }

    /// Whether the field is a collection-valued relation.
    pub fn is_to_many_relation(&self) -> bool {
        self.multiple && self.relation.is_some()
    }

    /// Request paths written by this field.
    pub fn request_paths_or_name(&self) -> Vec<&str> {
        if self.request.is_empty() {
            vec![self.name.as_str()]
        } else {
            self.request.iter().map(String::as_str).collect()
        }
    }
}

/// Ordered field descriptors for one record type.
#[derive(Debug, Clone, Default)]
pub struct FieldCatalogue {
    fields: Vec<FieldDescriptor>,
}

impl FieldCatalogue {
    /// Builds a catalogue, rejecting duplicate field names and `multiple`
    /// relation fields over a to-one relation.
    pub fn new(fields: Vec<FieldDescriptor>) -> CrudResult<Self> {
        let invalid = |message: String| QueryError::InvalidParameter {
            parameter: "fields".to_string(),
            message,
        };
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(invalid(format!("duplicate field '{}'", field.name)).into());
            }
            if let (true, Some(relation)) = (field.multiple, &field.relation)
                && !relation.kind.is_to_many()
            {
                return Err(invalid(format!(
                    "field '{}' is multiple but relation '{}' is {:?}",
                    field.name, relation.name, relation.kind
                ))
                .into());
            }
        }
        Ok(Self { fields })
    }

    /// Parses a catalogue from its JSON form.
    pub fn from_json(value: Value) -> CrudResult<Self> {
        let fields: Vec<FieldDescriptor> = serde_json::from_value(value)?;
        Self::new(fields)
    }

    /// Looks up a field by name.
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Iterates fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the catalogue has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields shown in the listing.
    pub fn index_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.show_on_index)
    }

    /// Fields covered by the free-text search.
    pub fn searchable(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.searchable && !f.is_virtual)
    }

    /// Collection-valued relation fields.
    pub fn to_many_relations(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_to_many_relation())
    }

    /// Allow-list derived from the catalogue: request paths of every
    /// writable field, flattened and de-duplicated in declaration order.
    pub fn fillable_paths(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.fields
            .iter()
            .filter(|f| f.is_fillable())
            .flat_map(|f| f.request_paths_or_name())
            .filter(|path| seen.insert(*path))
            .map(str::to_string)
            .collect()
    }
}
