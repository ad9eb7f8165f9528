//! Documents stored in collections
//!
//! A document is an ordered map of field names to values. Every stored
//! document carries an `_id` field that is its record identity within the
//! collection.

use crate::error::{Error, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the identity field
pub const ID_FIELD: &str = "_id";

/// A document: field name → value, ordered by field name
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(BTreeMap<String, Value>);

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from a JSON object
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `json` is not an object.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        match Value::from(json) {
            Value::Object(fields) => Ok(Document(fields)),
            other => Err(Error::InvalidInput(format!(
                "document must be an object, got {}",
                other.type_name()
            ))),
        }
    }

    /// The `_id` value, if present
    pub fn id(&self) -> Option<&Value> {
        self.0.get(ID_FIELD)
    }

    /// Get a field by dotted path (`"a.b.c"` descends into sub-objects)
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Get a field, treating a missing field as `Null` (index key semantics)
    pub fn get_or_null(&self, path: &str) -> Value {
        self.get(path).cloned().unwrap_or(Value::Null)
    }

    /// Set a field by dotted path, creating intermediate objects
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if an intermediate segment exists and is not an
    /// object.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        let segments: Vec<&str> = path.split('.').collect();
        let (last, parents) = match segments.split_last() {
            Some(split) => split,
            None => return Err(Error::InvalidInput("empty field path".to_string())),
        };
        let mut map = &mut self.0;
        for segment in parents {
            let entry = map
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(BTreeMap::new()));
            map = match entry {
                Value::Object(inner) => inner,
                other => {
                    return Err(Error::InvalidInput(format!(
                        "cannot descend into '{}' of type {} in path '{}'",
                        segment,
                        other.type_name(),
                        path
                    )))
                }
            };
        }
        map.insert((*last).to_string(), value);
        Ok(())
    }

    /// Remove a field by dotted path, returning the old value
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop()?;
        let mut map = &mut self.0;
        for segment in segments {
            map = match map.get_mut(segment)? {
                Value::Object(inner) => inner,
                _ => return None,
            };
        }
        map.remove(last)
    }

    /// Iterate over top-level fields
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of top-level fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the document has no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert to a `serde_json::Value`
    pub fn to_json(&self) -> serde_json::Value {
        Value::Object(self.0.clone()).to_json()
    }
}

impl From<BTreeMap<String, Value>> for Document {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Document(fields)
    }
}

impl TryFrom<serde_json::Value> for Document {
    type Error = Error;

    fn try_from(json: serde_json::Value) -> Result<Self> {
        Document::from_json(json)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
