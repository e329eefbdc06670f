//! Conversion between JSON values and SQLite values.

use rusqlite::Connection;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Map, Number, Value};

use crate::error::CrudResult;
use crate::query::SqlFragment;

/// Converts a JSON value into a bindable SQLite value.
pub(crate) fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Converts a column value into JSON. JSON columns are decoded.
pub(crate) fn from_sql_value(value: ValueRef<'_>, json: bool) -> Value {
    match value {
        ValueRef::Null if json => Value::Array(Vec::new()),
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            if json {
                serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.into_owned()))
            } else {
                Value::String(text.into_owned())
            }
        }
        ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Runs a query and returns every row as an attribute map.
pub(crate) fn query_rows(
    conn: &Connection,
    fragment: &SqlFragment,
    json_columns: &[String],
) -> CrudResult<Vec<Map<String, Value>>> {
    let mut stmt = conn.prepare(&fragment.sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let json_flags: Vec<bool> = names.iter().map(|n| json_columns.contains(n)).collect();

    let params = rusqlite::params_from_iter(fragment.params.iter().map(to_sql_value));
    let rows = stmt.query_map(params, |row| {
        let mut map = Map::new();
        for (i, name) in names.iter().enumerate() {
            map.insert(name.clone(), from_sql_value(row.get_ref(i)?, json_flags[i]));
        }
        Ok(map)
    })?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Runs a single-column query and returns its values.
pub(crate) fn query_column(conn: &Connection, fragment: &SqlFragment) -> CrudResult<Vec<Value>> {
    let mut stmt = conn.prepare(&fragment.sql)?;
    let params = rusqlite::params_from_iter(fragment.params.iter().map(to_sql_value));
    let values = stmt.query_map(params, |row| Ok(from_sql_value(row.get_ref(0)?, false)))?;
    Ok(values.collect::<Result<Vec<_>, _>>()?)
}

/// Runs a `COUNT(*)` query.
pub(crate) fn count(conn: &Connection, fragment: &SqlFragment) -> CrudResult<u64> {
    let params = rusqlite::params_from_iter(fragment.params.iter().map(to_sql_value));
    let total: i64 = conn.query_row(&fragment.sql, params, |row| row.get(0))?;
    Ok(u64::try_from(total).unwrap_or_default())
}

/// Executes a statement and returns the number of affected rows.
pub(crate) fn execute(conn: &Connection, fragment: &SqlFragment) -> CrudResult<usize> {
    let params = rusqlite::params_from_iter(fragment.params.iter().map(to_sql_value));
    Ok(conn.execute(&fragment.sql, params)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_mapping() {
        assert_eq!(to_sql_value(&json!(true)), SqlValue::Integer(1));
        assert_eq!(to_sql_value(&json!(2.5)), SqlValue::Real(2.5));
        assert_eq!(
            to_sql_value(&json!({"a": 1})),
            SqlValue::Text("{\"a\":1}".to_string())
        );
    }

    #[test]
    fn test_query_rows_decodes_json_columns() {
        let conn = Connection::open_in_memory().unwrap();
        let rows = query_rows(
            &conn,
            &SqlFragment::with_params("SELECT ?1 AS name, '[1,2]' AS tags, NULL AS empty", vec![json!("Ada")]),
            &["tags".to_string(), "empty".to_string()],
        )
        .unwrap();
        assert_eq!(rows[0]["name"], json!("Ada"));
        assert_eq!(rows[0]["tags"], json!([1, 2]));
        assert_eq!(rows[0]["empty"], json!([]));
    }
}
