//! Dotted-path helpers for nested JSON values.
//!
//! A path such as `profile.height` or `family.0.name` addresses a value
//! inside nested objects and arrays. Reads treat numeric segments as array
//! indices; writes treat them as object keys.

use serde_json::{Map, Value};

/// Splits a dotted path into its segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

/// Resolves a dotted path inside an attribute map.
pub fn get_in<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = segments(path).into_iter();
    let first = parts.next()?;
    let mut current = map.get(first)?;
    for segment in parts {
        current = match current {
            Value::Object(inner) => inner.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Writes a value at a dotted path, creating intermediate objects.
///
/// Non-object intermediates are replaced by objects. Numeric segments are
/// object keys here, never array indices: writing `family.0.name` yields
/// `{"family": {"0": {"name": ..}}}`.
pub fn set_in(map: &mut Map<String, Value>, path: &str, value: Value) {
    let parts = segments(path);
    let Some((last, parents)) = parts.split_last() else {
        return;
    };

    let mut current = map;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(inner) => inner,
            _ => unreachable!("entry was just made an object"),
        };
    }
    current.insert(last.to_string(), value);
}

/// Expands dotted keys into nested objects.
///
/// `{"profile.height": 185, "name": "A"}` becomes
/// `{"profile": {"height": 185}, "name": "A"}`. Keys without dots are kept as
/// they are; a later dotted key merges into an earlier object.
///
/// Numeric segments become object keys, as in [`set_in`]. Arrays are only
/// ever written whole, so `family.0.name` never addresses an element of a
/// stored `family` array.
pub fn undot(map: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        if key.contains('.') {
            set_in(&mut out, &key, value);
        } else {
            match (out.get_mut(&key), value) {
                (Some(Value::Object(existing)), Value::Object(incoming)) => {
                    for (k, v) in incoming {
                        existing.insert(k, v);
                    }
                }
                (_, value) => {
                    out.insert(key, value);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_in_nested_and_indexed() {
        let Value::Object(map) = json!({"profile": {"height": 180}, "family": [{"name": "X"}]}) else {
            unreachable!()
        };
        assert_eq!(get_in(&map, "profile.height"), Some(&json!(180)));
        assert_eq!(get_in(&map, "family.0.name"), Some(&json!("X")));
        assert_eq!(get_in(&map, "family.3.name"), None);
        assert_eq!(get_in(&map, "profile.eyes"), None);
    }

    #[test]
    fn test_undot_merges_siblings() {
        let map = json!({"profile.height": 185, "profile.eyes": "blue", "name": "A"});
        let Value::Object(map) = map else { unreachable!() };
        let nested = undot(map);
        assert_eq!(
            Value::Object(nested),
            json!({"profile": {"height": 185, "eyes": "blue"}, "name": "A"})
        );
    }

    #[test]
    fn test_undot_numeric_segments_are_keys() {
        let Value::Object(map) = json!({"family.0.name": "A"}) else { unreachable!() };
        assert_eq!(Value::Object(undot(map)), json!({"family": {"0": {"name": "A"}}}));
    }

    #[test]
    fn test_set_in_replaces_scalar_parent() {
        let mut map = Map::new();
        map.insert("profile".to_string(), json!("flat"));
        set_in(&mut map, "profile.height", json!(170));
        assert_eq!(map["profile"], json!({"height": 170}));
    }

}
