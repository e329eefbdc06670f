//! Fillable/guarded resolution.
//!
//! Decides which input keys may be written to a record:
//!
//! 1. Candidate allow-list: the record type's explicit fillable list, else
//!    the catalogue-derived request paths, else every input key.
//! 2. Guarded keys and their dotted descendants are removed from the
//!    candidates. A wildcard guard (`*`) blocks everything unless an
//!    explicit or catalogue-derived allow-list exists.
//! 3. The input is filtered against the allow-list: exact match, ancestor
//!    match, descent into nested objects and arrays, and `*` segments that
//!    match any single key or index.
//! 4. Guarded paths are stripped again from the result, so a fillable
//!    ancestor never re-admits a guarded descendant.
//!
//! Dropped keys are never reported.

use serde_json::{Map, Value};

use crate::field::FieldCatalogue;
use crate::model::{ModelSchema, path};

const WILDCARD: &str = "*";

/// Filters `input` down to the keys the record type permits writing.
pub fn resolve(
    model: &ModelSchema,
    fields: &FieldCatalogue,
    input: &Map<String, Value>,
) -> Map<String, Value> {
    let allowed = allow_list(model, fields, input);
    let filtered = filter_input(input, &allowed);
    strip_guarded(filtered, &model.guarded)
}

/// Whether the record type's guarded list names `key` or one of its
/// ancestors. The wildcard guard is not considered.
pub fn guards(model: &ModelSchema, key: &str) -> bool {
    is_guarded(key, &model.guarded)
}

/// Final allow-list after guarded subtraction (steps 1 and 2).
pub fn allow_list(
    model: &ModelSchema,
    fields: &FieldCatalogue,
    input: &Map<String, Value>,
) -> Vec<String> {
    let declared = if !model.fillable.is_empty() {
        Some(model.fillable.clone())
    } else if !fields.is_empty() {
        Some(fields.fillable_paths())
    } else {
        None
    };

    let candidates = match declared {
        Some(list) => list,
        None if model.is_totally_guarded() => return Vec::new(),
        None => input.keys().cloned().collect(),
    };

    candidates
        .into_iter()
        .filter(|candidate| !is_guarded(candidate, &model.guarded))
        .collect()
}

fn is_guarded(key: &str, guarded: &[String]) -> bool {
    guarded
        .iter()
        .filter(|g| g.as_str() != WILDCARD)
        .any(|g| covers(g, key))
}

/// `pattern` equals `key` or is one of its ancestors.
fn covers(pattern: &str, key: &str) -> bool {
    let pattern = path::segments(pattern);
    let key = path::segments(key);
    pattern.len() <= key.len() && segments_match(&pattern, &key)
}

/// `key` is a proper ancestor of `pattern`.
fn extends(pattern: &str, key: &str) -> bool {
    let pattern = path::segments(pattern);
    let key = path::segments(key);
    pattern.len() > key.len() && segments_match(&pattern, &key)
}

fn segments_match(pattern: &[&str], key: &[&str]) -> bool {
    pattern
        .iter()
        .zip(key)
        .all(|(p, k)| *p == WILDCARD || p == k)
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

/// Keeps the parts of `input` reachable through the allow-list.
pub fn filter_input(input: &Map<String, Value>, allowed: &[String]) -> Map<String, Value> {
    filter_map(input, "", allowed)
}

fn filter_map(map: &Map<String, Value>, prefix: &str, allowed: &[String]) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        let here = join(prefix, key);
        if let Some(kept) = filter_value(value, &here, allowed) {
            out.insert(key.clone(), kept);
        }
    }
    out
}

fn filter_value(value: &Value, here: &str, allowed: &[String]) -> Option<Value> {
    if allowed.iter().any(|p| covers(p, here)) {
        return Some(value.clone());
    }
    if !allowed.iter().any(|p| extends(p, here)) {
        return None;
    }
    match value {
        Value::Object(inner) => {
            let kept = filter_map(inner, here, allowed);
            (!kept.is_empty()).then_some(Value::Object(kept))
        }
        Value::Array(items) => {
            let kept: Vec<Value> = items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| filter_value(item, &join(here, &i.to_string()), allowed))
                .collect();
            (!kept.is_empty()).then_some(Value::Array(kept))
        }
        _ => None,
    }
}

/// Removes every guarded path from `data`.
pub fn strip_guarded(data: Map<String, Value>, guarded: &[String]) -> Map<String, Value> {
    if guarded.iter().all(|g| g == WILDCARD) {
        return data;
    }
    strip_map(data, "", guarded)
}

fn strip_map(map: Map<String, Value>, prefix: &str, guarded: &[String]) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        let here = join(prefix, &key);
        if let Some(kept) = strip_value(value, &here, guarded) {
            out.insert(key, kept);
        }
    }
    out
}

fn strip_value(value: Value, here: &str, guarded: &[String]) -> Option<Value> {
    if is_guarded(here, guarded) {
        return None;
    }
    let guarded_below = guarded
        .iter()
        .filter(|g| g.as_str() != WILDCARD)
        .any(|g| extends(g, here));
    if !guarded_below {
        return Some(value);
    }
    match value {
        Value::Object(inner) => Some(Value::Object(strip_map(inner, here, guarded))),
        Value::Array(items) => Some(Value::Array(
            items
                .into_iter()
                .enumerate()
                .filter_map(|(i, item)| strip_value(item, &join(here, &i.to_string()), guarded))
                .collect(),
        )),
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldDescriptor, FieldType};
    use crate::model::ConnectionInfo;
    use serde_json::json;

    fn model() -> ModelSchema {
        ModelSchema::new("Person", "people", ConnectionInfo::mongodb()).with_primary_key("_id")
    }

    fn input(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("object expected"),
        }
    }

    #[test]
    fn test_explicit_fillable_wins() {
        let model = model().with_fillable(["name"]);
        let fields = FieldCatalogue::new(vec![FieldDescriptor::new("email", FieldType::Text)]).unwrap();
        let data = resolve(&model, &fields, &input(json!({"name": "A", "email": "a@b"})));
        assert_eq!(Value::Object(data), json!({"name": "A"}));
    }

    #[test]
    fn test_catalogue_derived_paths() {
        let fields = FieldCatalogue::new(vec![
            FieldDescriptor::new("name", FieldType::Text),
            FieldDescriptor::new("height", FieldType::Number).request_paths(["profile.height"]),
            FieldDescriptor::new("age", FieldType::Number).virtual_field(),
            FieldDescriptor::new("secret", FieldType::Text).fillable(false),
        ])
        .unwrap();
        let data = resolve(
            &model(),
            &fields,
            &input(json!({
                "name": "A",
                "profile": {"height": 180, "eyes": "blue"},
                "age": 3,
                "secret": "x"
            })),
        );
        assert_eq!(
            Value::Object(data),
            json!({"name": "A", "profile": {"height": 180}})
        );
    }

    #[test]
    fn test_no_signal_allows_input_keys() {
        let data = resolve(
            &model(),
            &FieldCatalogue::default(),
            &input(json!({"name": "A", "role": "admin"})),
        );
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn test_guarded_descendants_blocked() {
        let model = model().with_guarded(["profile"]);
        for payload in [
            json!({"profile": {"height": 185}, "name": "A"}),
            json!({"profile.height": 185, "name": "A"}),
        ] {
            let data = resolve(&model, &FieldCatalogue::default(), &input(payload));
            assert_eq!(Value::Object(data), json!({"name": "A"}));
        }
    }

    #[test]
    fn test_guarded_descendant_of_fillable_ancestor_stripped() {
        let model = model()
            .with_fillable(["profile"])
            .with_guarded(["profile.height"]);
        let data = resolve(
            &model,
            &FieldCatalogue::default(),
            &input(json!({"profile": {"height": 185, "eyes": "green"}})),
        );
        assert_eq!(Value::Object(data), json!({"profile": {"eyes": "green"}}));
    }

    #[test]
    fn test_wildcard_guard() {
        let blocked = model().with_guarded(["*"]);
        let data = resolve(&blocked, &FieldCatalogue::default(), &input(json!({"name": "A"})));
        assert!(data.is_empty());

        let with_fillable = model().with_guarded(["*"]).with_fillable(["name"]);
        let data = resolve(
            &with_fillable,
            &FieldCatalogue::default(),
            &input(json!({"name": "A", "role": "admin"})),
        );
        assert_eq!(Value::Object(data), json!({"name": "A"}));

        let fields = FieldCatalogue::new(vec![FieldDescriptor::new("role", FieldType::Text)]).unwrap();
        let data = resolve(
            &model().with_guarded(["*"]),
            &fields,
            &input(json!({"name": "A", "role": "admin"})),
        );
        assert_eq!(Value::Object(data), json!({"role": "admin"}));
    }

    #[test]
    fn test_wildcard_segments() {
        let model = model().with_fillable(["family.*.first_name"]);
        let data = resolve(
            &model,
            &FieldCatalogue::default(),
            &input(json!({
                "family": [
                    {"first_name": "A", "ssn": "1"},
                    {"first_name": "B"},
                    {"ssn": "3"}
                ]
            })),
        );
        assert_eq!(
            Value::Object(data),
            json!({"family": [{"first_name": "A"}, {"first_name": "B"}]})
        );
    }

    #[test]
    fn test_guards_ignores_wildcard() {
        let model = model().with_guarded(["profile", "*"]);
        assert!(guards(&model, "profile.height"));
        assert!(!guards(&model, "name"));
    }
}
