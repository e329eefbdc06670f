//! Filter request parsing.
//!
//! The `filters` listing parameter is one JSON object keyed by field name.
//! [`FilterRequest::parse`] sorts its entries into three buckets using the
//! field catalogue:
//!
//! - `original`: scalar columns, dispatched on the field's [`FilterType`]
//! - `relational`: collection-valued relations, filtered by related key
//! - `custom_query`: fields carrying their own predicate
//!
//! Entries naming unknown or non-filterable fields are dropped.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::error::{CrudResult, QueryError};
use crate::field::{FieldCatalogue, FilterQuery, FilterType};

/// A filter on a scalar column.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginalFilter {
    /// Column name.
    pub column: String,
    /// Raw request value.
    pub value: Value,
    /// How the value is applied.
    pub filter_type: FilterType,
}

/// A filter on a collection-valued relation.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationalFilter {
    /// Relation accessor name.
    pub relation: String,
    /// Accepted related keys.
    pub values: Vec<Value>,
}

/// A filter delegated to the field's own predicate.
#[derive(Debug, Clone)]
pub struct CustomFilter {
    /// Field name.
    pub field: String,
    /// Raw request value.
    pub value: Value,
    /// The field's predicate.
    pub query: FilterQuery,
}

/// Filters of one listing request, by bucket.
#[derive(Debug, Clone, Default)]
pub struct FilterRequest {
    /// Scalar column filters.
    pub original: Vec<OriginalFilter>,
    /// Relation filters.
    pub relational: Vec<RelationalFilter>,
    /// Custom predicate filters.
    pub custom_query: Vec<CustomFilter>,
}

impl FilterRequest {
    /// Sorts raw filter values into buckets.
    pub fn parse(raw: &Map<String, Value>, fields: &FieldCatalogue) -> Self {
        let mut request = Self::default();
        for (name, value) in raw {
            if is_blank(value) {
                continue;
            }
            let Some(field) = fields.get(name) else {
                tracing::debug!(field = %name, "dropping filter on unknown field");
                continue;
            };

            if let Some(query) = &field.filter_query {
                request.custom_query.push(CustomFilter {
                    field: name.clone(),
                    value: value.clone(),
                    query: query.clone(),
                });
            } else if let (true, Some(relation)) = (field.multiple, &field.relation) {
                request.relational.push(RelationalFilter {
                    relation: relation.name.clone(),
                    values: as_list(value),
                });
            } else if field.filterable || field.filter_type.is_some() {
                request.original.push(OriginalFilter {
                    column: name.clone(),
                    value: value.clone(),
                    filter_type: field.filter_type.unwrap_or(FilterType::Select),
                });
            } else {
                tracing::debug!(field = %name, "dropping filter on non-filterable field");
            }
        }
        request
    }

    /// Returns `true` if no bucket holds a filter.
    pub fn is_empty(&self) -> bool {
        self.original.is_empty() && self.relational.is_empty() && self.custom_query.is_empty()
    }
}

/// An inclusive day range from a date picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    /// First day included.
    pub start: NaiveDate,
    /// Last day included.
    pub end: NaiveDate,
}

impl DateRange {
    /// Parses `[start, end]`. Each bound may be a plain date or a timestamp;
    /// only its day is used.
    pub fn parse(column: &str, raw: &Value) -> CrudResult<Self> {
        let invalid = || QueryError::InvalidDate {
            column: column.to_string(),
            value: raw.to_string(),
        };
        let [start, end] = raw.as_array().map(Vec::as_slice).unwrap_or_default() else {
            return Err(invalid().into());
        };
        let start = start.as_str().and_then(parse_day).ok_or_else(invalid)?;
        let end = end.as_str().and_then(parse_day).ok_or_else(invalid)?;
        Ok(Self { start, end })
    }
}

fn parse_day(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim().get(..10)?, "%Y-%m-%d").ok()
}

/// Inclusive `[lo, hi]` bounds of a slider.
pub fn slider_bounds(column: &str, raw: &Value) -> CrudResult<(Value, Value)> {
    match raw.as_array().map(Vec::as_slice) {
        Some([lo, hi]) if !lo.is_null() && !hi.is_null() => Ok((lo.clone(), hi.clone())),
        _ => Err(QueryError::InvalidParameter {
            parameter: format!("filters.{}", column),
            message: "expected [min, max]".to_string(),
        }
        .into()),
    }
}

/// Wraps a scalar in a list; arrays pass through.
pub fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
