//! Filter document evaluation.
//!
//! Supports `$and`, `$or`, `$nor` and the field operators `$eq`, `$ne`,
//! `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$regex` (with `$options`)
//! and `$exists`. A field holding an array matches when any element
//! matches. `{"$date": ...}` values compare as instants.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use serde_json::{Map, Value};

use crate::model::path;

/// Whether the document satisfies the filter.
pub fn matches(doc: &Map<String, Value>, filter: &Value) -> bool {
    let Value::Object(clauses) = filter else {
        return false;
    };
    clauses.iter().all(|(key, condition)| match key.as_str() {
        "$and" => each(condition).all(|c| matches(doc, c)),
        "$or" => each(condition).any(|c| matches(doc, c)),
        "$nor" => !each(condition).any(|c| matches(doc, c)),
        field => field_matches(path::get_in(doc, field), condition),
    })
}

fn each(value: &Value) -> impl Iterator<Item = &Value> {
    value.as_array().map(Vec::as_slice).unwrap_or_default().iter()
}

/// Parses `{"$date": ...}` into an instant.
pub fn as_date(value: &Value) -> Option<DateTime<Utc>> {
    let Value::Object(map) = value else {
        return None;
    };
    if map.len() != 1 {
        return None;
    }
    match map.get("$date")? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        Value::Number(n) => DateTime::from_timestamp_millis(n.as_i64()?),
        Value::Object(inner) => {
            let millis = inner.get("$numberLong")?.as_str()?.parse().ok()?;
            DateTime::from_timestamp_millis(millis)
        }
        _ => None,
    }
}

fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            !map.is_empty() && as_date(value).is_none() && map.keys().all(|k| k.starts_with('$'))
        }
        _ => false,
    }
}

fn field_matches(actual: Option<&Value>, condition: &Value) -> bool {
    if !is_operator_object(condition) {
        return equals(actual, condition);
    }
    let Value::Object(ops) = condition else {
        return false;
    };
    ops.iter().all(|(op, operand)| match op.as_str() {
        "$eq" => equals(actual, operand),
        "$ne" => !equals(actual, operand),
        "$gt" => compares(actual, operand, |o| o == Ordering::Greater),
        "$gte" => compares(actual, operand, |o| o != Ordering::Less),
        "$lt" => compares(actual, operand, |o| o == Ordering::Less),
        "$lte" => compares(actual, operand, |o| o != Ordering::Greater),
        "$in" => each(operand).any(|candidate| equals(actual, candidate)),
        "$nin" => !each(operand).any(|candidate| equals(actual, candidate)),
        "$exists" => actual.is_some() == operand.as_bool().unwrap_or(true),
        "$regex" => regex_matches(actual, operand, ops.get("$options")),
        "$options" => true,
        other => {
            tracing::debug!(operator = other, "unsupported filter operator never matches");
            false
        }
    })
}

fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        // A missing field equals null
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => match (as_date(a), as_date(b)) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
    }
}

fn compares(actual: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match actual {
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| compare_same_type(item, operand).is_some_and(&accept)),
        Some(value) => compare_same_type(value, operand).is_some_and(accept),
        None => false,
    }
}

/// Orders two values of the same kind; `None` across kinds.
pub fn compare_same_type(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => match (as_date(a), as_date(b)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => None,
        },
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(v) if as_date(v).is_some() => 6,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order used for sorting: by kind first, then by value.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let by_rank = type_rank(a).cmp(&type_rank(b));
    if by_rank != Ordering::Equal {
        return by_rank;
    }
    match (a, b) {
        (Some(a), Some(b)) => compare_same_type(a, b).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

fn regex_matches(actual: Option<&Value>, pattern: &Value, options: Option<&Value>) -> bool {
    let Some(pattern) = pattern.as_str() else {
        return false;
    };
    let case_insensitive = options
        .and_then(Value::as_str)
        .is_some_and(|o| o.contains('i'));
    let Ok(regex) = RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
    else {
        tracing::debug!(pattern, "invalid regex never matches");
        return false;
    };
    match actual {
        Some(Value::String(s)) => regex.is_match(s),
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| item.as_str().is_some_and(|s| regex.is_match(s))),
        _ => false,
    }
}
