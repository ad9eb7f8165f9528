//! Query filters and access planning
//!
//! Filters are parsed from JSON in the familiar document-store shape:
//!
//! ```text
//! { "_id": 1 }                          equality
//! { "y": { "$gte": 2, "$lt": 10 } }     comparison operators
//! { "a.b": "x", "c": null }             dotted paths, null matches missing
//! ```
//!
//! The planner picks one access path per query. The chosen path only
//! narrows the candidate set; every candidate is re-checked against the
//! whole filter after visibility is resolved.

use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::Arc;

use tarn_core::{Document, Error, KeyRange, KeySpace, Result, Value, ID_FIELD};
use tarn_storage::{IndexCatalog, SecondaryIndex};

/// A single comparison on one field
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field == value`
    Eq(Value),
    /// `field > value`
    Gt(Value),
    /// `field >= value`
    Gte(Value),
    /// `field < value`
    Lt(Value),
    /// `field <= value`
    Lte(Value),
}

impl Condition {
    fn parse(op: &str, operand: &serde_json::Value) -> Result<Self> {
        let value = Value::from(operand.clone());
        match op {
            "$eq" => Ok(Condition::Eq(value)),
            "$gt" => Ok(Condition::Gt(value)),
            "$gte" => Ok(Condition::Gte(value)),
            "$lt" => Ok(Condition::Lt(value)),
            "$lte" => Ok(Condition::Lte(value)),
            other => Err(Error::InvalidInput(format!("unknown operator: {}", other))),
        }
    }

    /// Check `actual` against this condition
    ///
    /// Ordering comparisons only match within a type class (numbers with
    /// numbers, strings with strings, ...).
    pub fn matches(&self, actual: &Value) -> bool {
        match self {
            Condition::Eq(v) => actual == v,
            Condition::Gt(v) => comparable(actual, v) && actual > v,
            Condition::Gte(v) => comparable(actual, v) && actual >= v,
            Condition::Lt(v) => comparable(actual, v) && actual < v,
            Condition::Lte(v) => comparable(actual, v) && actual <= v,
        }
    }
}

fn comparable(a: &Value, b: &Value) -> bool {
    (a.is_number() && b.is_number()) || a.type_name() == b.type_name()
}

/// Conjunction of per-field conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Vec<Condition>)>,
    source: serde_json::Value,
}

impl Filter {
    /// Filter matching every document
    pub fn all() -> Self {
        Self {
            clauses: Vec::new(),
            source: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Parse a filter document
    ///
    /// `null` is accepted as the empty filter.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        let map = match &json {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => return Ok(Self::all()),
            other => {
                return Err(Error::InvalidInput(format!(
                    "filter must be an object, got {}",
                    other
                )))
            }
        };

        let mut clauses = Vec::with_capacity(map.len());
        for (field, spec) in map {
            if field.starts_with('$') {
                return Err(Error::InvalidInput(format!(
                    "unsupported top-level operator: {}",
                    field
                )));
            }
            clauses.push((field.clone(), parse_conditions(field, spec)?));
        }
        Ok(Self {
            clauses,
            source: json,
        })
    }

    /// Original filter document (as recorded in profiles)
    pub fn source(&self) -> &serde_json::Value {
        &self.source
    }

    /// Check if the filter has no clauses
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Fields constrained by the filter, in clause order
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().map(|(field, _)| field.as_str())
    }

    /// Check a document against every clause
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|(field, conditions)| {
            let actual = doc.get_or_null(field);
            conditions.iter().all(|c| c.matches(&actual))
        })
    }

    /// Tightest interval the conditions on `field` allow, if constrained
    pub fn bounds_for(&self, field: &str) -> Option<(Bound<Value>, Bound<Value>)> {
        let (_, conditions) = self.clauses.iter().find(|(f, _)| f == field)?;
        let mut lower = Bound::Unbounded;
        let mut upper = Bound::Unbounded;
        for condition in conditions {
            match condition {
                Condition::Eq(v) => {
                    lower = tighter_lower(lower, Bound::Included(v.clone()));
                    upper = tighter_upper(upper, Bound::Included(v.clone()));
                }
                Condition::Gt(v) => lower = tighter_lower(lower, Bound::Excluded(v.clone())),
                Condition::Gte(v) => lower = tighter_lower(lower, Bound::Included(v.clone())),
                Condition::Lt(v) => upper = tighter_upper(upper, Bound::Excluded(v.clone())),
                Condition::Lte(v) => upper = tighter_upper(upper, Bound::Included(v.clone())),
            }
        }
        Some((lower, upper))
    }
}

fn parse_conditions(field: &str, spec: &serde_json::Value) -> Result<Vec<Condition>> {
    match spec {
        serde_json::Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            if !ops.keys().all(|k| k.starts_with('$')) {
                return Err(Error::InvalidInput(format!(
                    "cannot mix operators and fields in filter on '{}'",
                    field
                )));
            }
            ops.iter()
                .map(|(op, operand)| Condition::parse(op, operand))
                .collect()
        }
        literal => Ok(vec![Condition::Eq(Value::from(literal.clone()))]),
    }
}

fn bound_value(bound: &Bound<Value>) -> Option<&Value> {
    match bound {
        Bound::Included(v) | Bound::Excluded(v) => Some(v),
        Bound::Unbounded => None,
    }
}

fn tighter_lower(current: Bound<Value>, candidate: Bound<Value>) -> Bound<Value> {
    let (Some(cur), Some(cand)) = (bound_value(&current), bound_value(&candidate)) else {
        return if matches!(current, Bound::Unbounded) { candidate } else { current };
    };
    match cand.cmp(cur) {
        Ordering::Greater => candidate,
        Ordering::Less => current,
        Ordering::Equal if matches!(candidate, Bound::Excluded(_)) => candidate,
        Ordering::Equal => current,
    }
}

fn tighter_upper(current: Bound<Value>, candidate: Bound<Value>) -> Bound<Value> {
    let (Some(cur), Some(cand)) = (bound_value(&current), bound_value(&candidate)) else {
        return if matches!(current, Bound::Unbounded) { candidate } else { current };
    };
    match cand.cmp(cur) {
        Ordering::Less => candidate,
        Ordering::Greater => current,
        Ordering::Equal if matches!(candidate, Bound::Excluded(_)) => candidate,
        Ordering::Equal => current,
    }
}

// ============================================================================
// Planning
// ============================================================================

/// Access path for one query
#[derive(Debug, Clone)]
pub enum Plan {
    /// Point or range over `_id`
    IdRange(KeyRange),
    /// Range over a secondary index
    IndexRange {
        /// Index to read candidates from
        index: Arc<SecondaryIndex>,
        /// Entries to read
        range: KeyRange,
    },
    /// Every record of the collection
    CollectionScan(KeyRange),
}

impl Plan {
    /// Key range the plan reads (checked against prepared intents)
    pub fn range(&self) -> &KeyRange {
        match self {
            Plan::IdRange(range) | Plan::CollectionScan(range) => range,
            Plan::IndexRange { range, .. } => range,
        }
    }

    /// Short plan name for profiles and logs
    pub fn name(&self) -> &'static str {
        match self {
            Plan::IdRange(range) if range.as_point().is_some() => "IDHACK",
            Plan::IdRange(_) => "IDSCAN",
            Plan::IndexRange { .. } => "IXSCAN",
            Plan::CollectionScan(_) => "COLLSCAN",
        }
    }
}

/// Choose an access path for `filter` over `collection`
///
/// Preference: an `_id` constraint, then the first constrained field with an
/// index, then a full collection scan.
pub fn plan(collection: &str, filter: &Filter, indexes: &IndexCatalog) -> Plan {
    if let Some((lower, upper)) = filter.bounds_for(ID_FIELD) {
        return Plan::IdRange(KeyRange::new(KeySpace::primary(collection), lower, upper));
    }
    for field in filter.fields() {
        if let Some(index) = indexes.get(collection, field) {
            if let Some((lower, upper)) = filter.bounds_for(field) {
                let range = KeyRange::new(index.space(), lower, upper);
                return Plan::IndexRange { index, range };
            }
        }
    }
    Plan::CollectionScan(KeyRange::full(KeySpace::primary(collection)))
}
