//! Identity types
//!
//! - TxnId: transaction identifier allocated by the registry
//! - RecordKey: identity of a record (collection + `_id` value)

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction identifier
///
/// Allocated monotonically by the transaction registry. Never reused within
/// a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(u64);

impl TxnId {
    /// Create a transaction id from its raw value
    pub const fn new(raw: u64) -> Self {
        TxnId(raw)
    }

    /// Raw numeric value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Identity of a record: the collection it lives in and its `_id`
///
/// Keys order by collection first, then by `_id` in canonical value order,
/// so all records of a collection are contiguous.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Collection name
    pub collection: String,
    /// The record's `_id`
    pub id: Value,
}

impl RecordKey {
    /// Create a record key
    pub fn new(collection: impl Into<String>, id: impl Into<Value>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[_id={}]", self.collection, self.id)
    }
}
