//! Persisted record handle.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use super::path;

/// One persisted (or about-to-be persisted) entity.
///
/// A record keeps its current attributes next to the attributes it was
/// loaded with, so the pipeline can report which values a write changed.
/// Eager-loaded relations are held apart from attributes and are never
/// written back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    attributes: Map<String, Value>,
    original: Map<String, Value>,
    relations: Map<String, Value>,
    exists: bool,
}

impl Record {
    /// Creates a new, unsaved record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record from attributes loaded out of storage.
    pub fn from_storage(attributes: Map<String, Value>) -> Self {
        Self {
            original: attributes.clone(),
            attributes,
            relations: Map::new(),
            exists: true,
        }
    }

    /// Returns whether the record has been persisted.
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Returns the current attributes.
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Returns the current attributes mutably.
    pub fn attributes_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.attributes
    }

    /// Returns a top-level attribute.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Returns a nested attribute addressed by a dotted path.
    pub fn get_path(&self, key: &str) -> Option<&Value> {
        path::get_in(&self.attributes, key)
    }

    /// Replaces a top-level attribute.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    /// Replaces a top-level attribute that storage already holds, leaving
    /// it clean.
    pub fn set_stored(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.original.insert(key.clone(), value.clone());
        self.attributes.insert(key, value);
    }

    /// Returns the primary key value, if assigned.
    pub fn key(&self, primary_key: &str) -> Option<&Value> {
        self.attributes.get(primary_key).filter(|v| !v.is_null())
    }

    /// Attributes whose value differs from the loaded state.
    pub fn dirty(&self) -> Map<String, Value> {
        self.attributes
            .iter()
            .filter(|(key, value)| self.original.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Returns `true` if any attribute changed since load.
    pub fn is_dirty(&self) -> bool {
        self.attributes
            .iter()
            .any(|(key, value)| self.original.get(key) != Some(value))
    }

    /// Marks the current attributes as persisted.
    pub fn sync_original(&mut self) {
        self.original = self.attributes.clone();
        self.exists = true;
    }

    /// Attaches eager-loaded relation data.
    pub fn set_relation(&mut self, name: impl Into<String>, value: Value) {
        self.relations.insert(name.into(), value);
    }

    /// Returns eager-loaded relation data.
    pub fn relation(&self, name: &str) -> Option<&Value> {
        self.relations.get(name)
    }

    /// Converts the record into a JSON object of attributes and relations.
    pub fn to_value(&self) -> Value {
        let mut out = self.attributes.clone();
        for (name, value) in &self.relations {
            out.insert(name.clone(), value.clone());
        }
        Value::Object(out)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.attributes.len() + self.relations.len()))?;
        for (key, value) in &self.attributes {
            if !self.relations.contains_key(key) {
                map.serialize_entry(key, value)?;
            }
        }
        for (key, value) in &self.relations {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
