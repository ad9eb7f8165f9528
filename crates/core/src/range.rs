//! Key ranges over primary keys and index entries
//!
//! A `KeyRange` names a key space (a collection's `_id` space or one of its
//! secondary indexes) and an interval of values within it. Ranges describe
//! both what a read scans and what a transaction's writes may affect; two
//! ranges overlap when they share a key space and their intervals intersect.
//!
//! Overlap is conservative: `(1, 2)` with exclusive bounds on integers is
//! treated as non-empty. A false overlap only produces an extra conflict,
//! never a missed one.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Bound;

/// The key space a range lives in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeySpace {
    /// A collection's `_id` space
    Primary {
        /// Collection name
        collection: String,
    },
    /// Entries of a secondary index on one field
    Index {
        /// Collection name
        collection: String,
        /// Indexed field path
        field: String,
    },
}

impl KeySpace {
    /// The `_id` space of a collection
    pub fn primary(collection: impl Into<String>) -> Self {
        KeySpace::Primary {
            collection: collection.into(),
        }
    }

    /// The entry space of an index on `field`
    pub fn index(collection: impl Into<String>, field: impl Into<String>) -> Self {
        KeySpace::Index {
            collection: collection.into(),
            field: field.into(),
        }
    }

    /// Collection this space belongs to
    pub fn collection(&self) -> &str {
        match self {
            KeySpace::Primary { collection } | KeySpace::Index { collection, .. } => collection,
        }
    }
}

impl fmt::Display for KeySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySpace::Primary { collection } => write!(f, "{}._id", collection),
            KeySpace::Index { collection, field } => write!(f, "{}.$index({})", collection, field),
        }
    }
}

/// An interval of keys within one key space
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    /// Key space
    pub space: KeySpace,
    /// Lower bound
    pub lower: Bound<Value>,
    /// Upper bound
    pub upper: Bound<Value>,
}

impl KeyRange {
    /// Create a range from explicit bounds
    pub fn new(space: KeySpace, lower: Bound<Value>, upper: Bound<Value>) -> Self {
        Self {
            space,
            lower,
            upper,
        }
    }

    /// A single key
    pub fn point(space: KeySpace, key: Value) -> Self {
        Self {
            space,
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// Every key in the space
    pub fn full(space: KeySpace) -> Self {
        Self {
            space,
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// Check if `key` falls inside the interval
    pub fn contains(&self, key: &Value) -> bool {
        let above_lower = match &self.lower {
            Bound::Included(lo) => key >= lo,
            Bound::Excluded(lo) => key > lo,
            Bound::Unbounded => true,
        };
        let below_upper = match &self.upper {
            Bound::Included(hi) => key <= hi,
            Bound::Excluded(hi) => key < hi,
            Bound::Unbounded => true,
        };
        above_lower && below_upper
    }

    /// Check if the interval contains no keys
    pub fn is_empty(&self) -> bool {
        !interval_nonempty(&self.lower, &self.upper)
    }

    /// Check if this range shares at least one key with `other`
    pub fn overlaps(&self, other: &KeyRange) -> bool {
        self.space == other.space
            && !self.is_empty()
            && !other.is_empty()
            && interval_nonempty(&self.lower, &other.upper)
            && interval_nonempty(&other.lower, &self.upper)
    }

    /// Check if this range is a single key
    pub fn as_point(&self) -> Option<&Value> {
        match (&self.lower, &self.upper) {
            (Bound::Included(lo), Bound::Included(hi)) if lo == hi => Some(lo),
            _ => None,
        }
    }
}

/// Whether some key can satisfy both `lower` and `upper`
fn interval_nonempty(lower: &Bound<Value>, upper: &Bound<Value>) -> bool {
    match (lower, upper) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => true,
        (Bound::Included(lo), Bound::Included(hi)) => lo <= hi,
        (Bound::Included(lo), Bound::Excluded(hi))
        | (Bound::Excluded(lo), Bound::Included(hi))
        | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo < hi,
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lower = match &self.lower {
            Bound::Included(v) => format!("[{}", v),
            Bound::Excluded(v) => format!("({}", v),
            Bound::Unbounded => "(-inf".to_string(),
        };
        let upper = match &self.upper {
            Bound::Included(v) => format!("{}]", v),
            Bound::Excluded(v) => format!("{})", v),
            Bound::Unbounded => "+inf)".to_string(),
        };
        write!(f, "{} {}, {}", self.space, lower, upper)
    }
}
