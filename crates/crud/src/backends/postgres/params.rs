//! JSON to PostgreSQL parameter binding and row decoding.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Number, Value};
use postgres_types::{ToSql, Type};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{BackendError, CrudError, CrudResult};

/// An owned, typed parameter.
pub(crate) type BoxedParam = Box<dyn ToSql + Sync + Send>;

fn mismatch(value: &Value, ty: &Type) -> CrudError {
    CrudError::Backend(BackendError::SerializationError {
        message: format!("cannot bind {} as {}", value, ty.name()),
    })
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

/// Converts one JSON value into a parameter of the given type.
pub(crate) fn bind(value: &Value, ty: &Type) -> CrudResult<BoxedParam> {
    let null = value.is_null();
    let param: BoxedParam = match *ty {
        Type::INT2 => Box::new(if null {
            None
        } else {
            Some(as_i64(value).and_then(|i| i16::try_from(i).ok()).ok_or_else(|| mismatch(value, ty))?)
        }),
        Type::INT4 => Box::new(if null {
            None
        } else {
            Some(as_i64(value).and_then(|i| i32::try_from(i).ok()).ok_or_else(|| mismatch(value, ty))?)
        }),
        Type::INT8 => Box::new(if null {
            None
        } else {
            Some(as_i64(value).ok_or_else(|| mismatch(value, ty))?)
        }),
        Type::FLOAT4 => Box::new(if null {
            None
        } else {
            Some(as_f64(value).ok_or_else(|| mismatch(value, ty))? as f32)
        }),
        Type::FLOAT8 => Box::new(if null {
            None
        } else {
            Some(as_f64(value).ok_or_else(|| mismatch(value, ty))?)
        }),
        Type::BOOL => Box::new(if null {
            None
        } else {
            Some(match value {
                Value::Bool(b) => *b,
                other => as_i64(other).map(|i| i != 0).ok_or_else(|| mismatch(value, ty))?,
            })
        }),
        Type::JSON | Type::JSONB => Box::new(if null { None } else { Some(value.clone()) }),
        Type::TIMESTAMPTZ => Box::new(if null {
            None
        } else {
            Some(parse_timestamp(value).ok_or_else(|| mismatch(value, ty))?)
        }),
        Type::TIMESTAMP => Box::new(if null {
            None
        } else {
            Some(
                parse_timestamp(value)
                    .map(|ts| ts.naive_utc())
                    .ok_or_else(|| mismatch(value, ty))?,
            )
        }),
        Type::DATE => Box::new(if null {
            None
        } else {
            Some(
                parse_timestamp(value)
                    .map(|ts| ts.date_naive())
                    .ok_or_else(|| mismatch(value, ty))?,
            )
        }),
        Type::UUID => Box::new(if null {
            None
        } else {
            Some(
                value
                    .as_str()
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| mismatch(value, ty))?,
            )
        }),
        _ => Box::new(if null { None } else { Some(as_text(value)) }),
    };
    Ok(param)
}

/// Converts all parameters of a statement.
pub(crate) fn bind_all(values: &[Value], types: &[Type]) -> CrudResult<Vec<BoxedParam>> {
    values
        .iter()
        .zip(types)
        .map(|(value, ty)| bind(value, ty))
        .collect()
}

/// Borrows boxed parameters the way `tokio_postgres` expects them.
pub(crate) fn as_refs(params: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

/// Decodes one column into JSON.
fn column_value(row: &Row, index: usize, ty: &Type) -> CrudResult<Value> {
    let value = match *ty {
        Type::INT2 => row.try_get::<_, Option<i16>>(index)?.map(Value::from),
        Type::INT4 => row.try_get::<_, Option<i32>>(index)?.map(Value::from),
        Type::INT8 => row.try_get::<_, Option<i64>>(index)?.map(Value::from),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(index)?
            .and_then(|f| Number::from_f64(f64::from(f)).map(Value::Number)),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(index)?
            .and_then(|f| Number::from_f64(f).map(Value::Number)),
        Type::BOOL => row.try_get::<_, Option<bool>>(index)?.map(Value::from),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(index)?,
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(index)?
            .map(|ts| Value::String(ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(index)?
            .map(|ts| Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string())),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(index)?
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        Type::UUID => row
            .try_get::<_, Option<Uuid>>(index)?
            .map(|u| Value::String(u.to_string())),
        _ => match row.try_get::<_, Option<String>>(index) {
            Ok(text) => text.map(Value::String),
            Err(e) => {
                tracing::debug!(column = index, ty = %ty, error = %e, "undecodable column read as null");
                None
            }
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Decodes a row into an attribute map.
pub(crate) fn row_to_map(row: &Row) -> CrudResult<Map<String, Value>> {
    let mut map = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), column_value(row, index, column.type_())?);
    }
    Ok(map)
}
