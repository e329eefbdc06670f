//! JSON and BSON conversion, and listing pipelines.
//!
//! Filters and records are JSON inside the crate. On the way in they are
//! read as extended JSON, so `{"$date": ..}` becomes a BSON date. On the way
//! out dates are written back in that form and object ids become their hex
//! string.

use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document, doc};
use serde_json::{Map, Value};

use crate::error::{BackendError, CrudError, CrudResult};
use crate::query::{DocumentQuery, SortDirection};
use crate::types::PageRequest;

/// Converts a JSON value to BSON, reading extended JSON forms.
pub(crate) fn to_bson(value: Value) -> CrudResult<Bson> {
    Ok(Bson::try_from(value)?)
}

/// Converts a JSON object to a BSON document.
pub(crate) fn to_document(map: Map<String, Value>) -> CrudResult<Document> {
    match to_bson(Value::Object(map))? {
        Bson::Document(document) => Ok(document),
        other => Err(CrudError::Backend(BackendError::SerializationError {
            message: format!("expected a document, got {:?}", other.element_type()),
        })),
    }
}

/// Converts BSON to JSON.
pub(crate) fn to_json(value: Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::Document(document) => Value::Object(to_map(document)),
        Bson::Array(items) => Value::Array(items.into_iter().map(to_json).collect()),
        other => other.into_relaxed_extjson(),
    }
}

/// Converts a BSON document to a JSON object.
pub(crate) fn to_map(document: Document) -> Map<String, Value> {
    document.into_iter().map(|(k, v)| (k, to_json(v))).collect()
}

/// Filter matching a primary key. A string that parses as an object id
/// matches either form.
pub(crate) fn key_filter(primary_key: &str, id: &Value) -> CrudResult<Document> {
    let condition = match id {
        Value::String(text) => match ObjectId::parse_str(text) {
            Ok(oid) => Bson::Document(doc! { "$in": [text.as_str(), oid] }),
            Err(_) => Bson::String(text.clone()),
        },
        other => to_bson(other.clone())?,
    };
    let mut filter = Document::new();
    filter.insert(primary_key, condition);
    Ok(filter)
}

/// Aggregation pipeline for one page of a listing.
///
/// Stages run match, sort, skip and limit before projecting, so lookups
/// only touch the documents of the page.
pub(crate) fn listing_pipeline(query: &DocumentQuery, page: PageRequest) -> CrudResult<Vec<Document>> {
    let filter = match to_bson(query.filter.clone())? {
        Bson::Document(filter) => filter,
        _ => Document::new(),
    };

    let mut pipeline = vec![doc! { "$match": filter }];
    if !query.sort.is_empty() {
        let mut sort = Document::new();
        for (field, direction) in &query.sort {
            let order = match direction {
                SortDirection::Asc => 1,
                SortDirection::Desc => -1,
            };
            sort.insert(field.clone(), order);
        }
        pipeline.push(doc! { "$sort": sort });
    }
    pipeline.push(doc! { "$skip": i64::try_from(page.offset()).unwrap_or(i64::MAX) });
    pipeline.push(doc! { "$limit": i64::try_from(page.limit()).unwrap_or(i64::MAX) });

    let fields = projected_fields(&query.projection);
    if !fields.is_empty() {
        let mut projection = doc! { "_id": 1 };
        for field in fields {
            projection.insert(field, 1);
        }
        pipeline.push(doc! { "$project": projection });
    }

    for lookup in &query.lookups {
        pipeline.push(doc! {
            "$lookup": {
                "from": lookup.from.as_str(),
                "localField": lookup.local_field.as_str(),
                "foreignField": lookup.foreign_field.as_str(),
                "as": lookup.as_field.as_str(),
            }
        });
        if lookup.single {
            pipeline.push(doc! {
                "$unwind": {
                    "path": format!("${}", lookup.as_field),
                    "preserveNullAndEmptyArrays": true,
                }
            });
        }
    }
    Ok(pipeline)
}

/// Drops fields already covered by a projected ancestor; the server
/// rejects projections that name a path and its parent.
fn projected_fields(projection: &[String]) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for field in projection {
        if field == "_id" {
            continue;
        }
        let covered = projection.iter().any(|other| {
            other != field && field.starts_with(other.as_str()) && field[other.len()..].starts_with('.')
        });
        if !covered && !fields.contains(field) {
            fields.push(field.clone());
        }
    }
    fields
}
