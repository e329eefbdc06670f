//! Write responses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Response to a successful create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreResponse {
    /// Key of the new record.
    pub id: Value,
    /// Always `true`.
    pub created: bool,
    /// Human-readable outcome.
    pub message: String,
}

impl StoreResponse {
    /// Builds the response for a created record.
    pub fn new(model: &str, id: Value) -> Self {
        Self {
            id,
            created: true,
            message: format!("{} created successfully", model),
        }
    }
}

/// Response to a successful update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResponse {
    /// Key of the updated record.
    pub id: Value,
    /// Always `true`.
    pub updated: bool,
    /// Changed attributes and relation sync results.
    pub changes: Map<String, Value>,
    /// Human-readable outcome.
    pub message: String,
}

impl UpdateResponse {
    /// Builds the response for an updated record.
    pub fn new(model: &str, id: Value, changes: Map<String, Value>) -> Self {
        let message = if changes.is_empty() {
            format!("{} unchanged", model)
        } else {
            format!("{} updated successfully", model)
        };
        Self {
            id,
            updated: true,
            changes,
            message,
        }
    }
}
