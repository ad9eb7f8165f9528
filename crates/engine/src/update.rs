//! Update specifications
//!
//! An update is either a set of operators (`$set`, `$inc`, `$unset`) or a
//! replacement document. `_id` is immutable under both forms.

use tarn_core::{Document, Error, Result, Value, ID_FIELD};

/// One field modification
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Set a field, creating intermediate objects
    Set(String, Value),
    /// Add to a numeric field (a missing field starts at zero)
    Inc(String, Value),
    /// Remove a field
    Unset(String),
}

/// Parsed update document
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateSpec {
    /// Apply operators in order
    Operators(Vec<UpdateOp>),
    /// Replace everything but `_id`
    Replace(Document),
}

impl UpdateSpec {
    /// Parse an update document
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = &json else {
            return Err(Error::InvalidInput(format!(
                "update must be an object, got {}",
                json
            )));
        };

        if !map.keys().any(|k| k.starts_with('$')) {
            return Ok(UpdateSpec::Replace(Document::from_json(json)?));
        }
        if !map.keys().all(|k| k.starts_with('$')) {
            return Err(Error::InvalidInput(
                "update cannot mix operators and replacement fields".into(),
            ));
        }

        let mut ops = Vec::new();
        for (op, fields) in map {
            let serde_json::Value::Object(fields) = fields else {
                return Err(Error::InvalidInput(format!("{} expects an object", op)));
            };
            for (path, operand) in fields {
                if path == ID_FIELD {
                    return Err(Error::InvalidInput(format!(
                        "{} cannot modify the immutable field '_id'",
                        op
                    )));
                }
                let operand = Value::from(operand.clone());
                ops.push(match op.as_str() {
                    "$set" => UpdateOp::Set(path.clone(), operand),
                    "$inc" if operand.is_number() => UpdateOp::Inc(path.clone(), operand),
                    "$inc" => {
                        return Err(Error::InvalidInput(format!(
                            "$inc on '{}' needs a numeric operand, got {}",
                            path,
                            operand.type_name()
                        )))
                    }
                    "$unset" => UpdateOp::Unset(path.clone()),
                    other => {
                        return Err(Error::InvalidInput(format!(
                            "unknown update operator: {}",
                            other
                        )))
                    }
                });
            }
        }
        if ops.is_empty() {
            return Err(Error::InvalidInput("update has no fields to modify".into()));
        }
        Ok(UpdateSpec::Operators(ops))
    }

    /// Produce the updated document; `current` is left untouched
    pub fn apply(&self, current: &Document) -> Result<Document> {
        match self {
            UpdateSpec::Replace(replacement) => {
                let mut next = replacement.clone();
                match (current.id(), replacement.id()) {
                    (Some(old), Some(new)) if old != new => {
                        return Err(Error::InvalidInput(format!(
                            "replacement changes immutable '_id' from {} to {}",
                            old, new
                        )))
                    }
                    (Some(old), _) => next.set(ID_FIELD, old.clone())?,
                    (None, _) => {}
                }
                Ok(next)
            }
            UpdateSpec::Operators(ops) => {
                let mut next = current.clone();
                for op in ops {
                    match op {
                        UpdateOp::Set(path, value) => next.set(path, value.clone())?,
                        UpdateOp::Inc(path, delta) => {
                            let sum = increment(path, next.get(path), delta)?;
                            next.set(path, sum)?;
                        }
                        UpdateOp::Unset(path) => {
                            next.remove(path);
                        }
                    }
                }
                Ok(next)
            }
        }
    }
}

fn increment(path: &str, current: Option<&Value>, delta: &Value) -> Result<Value> {
    match (current, delta) {
        (None, delta) => Ok(delta.clone()),
        (Some(Value::Int(a)), Value::Int(b)) => Ok(match a.checked_add(*b) {
            Some(sum) => Value::Int(sum),
            None => Value::Float(*a as f64 + *b as f64),
        }),
        (Some(a), b) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(a + b)),
            _ => Err(Error::InvalidInput(format!(
                "cannot $inc non-numeric field '{}' of type {}",
                path,
                a.type_name()
            ))),
        },
    }
}
