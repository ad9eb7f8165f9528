//! Record versions
//!
//! A `RecordVersion` is one immutable entry in a record's history. It never
//! changes after creation: a newer write supersedes it with a new version.
//! Visibility is not stored in the version itself but read through the
//! creating transaction's shared `TxnCell`, which is where the commit
//! timestamp appears when the transaction commits.

use std::sync::Arc;

use tarn_core::{Document, RecordKey, Timestamp, TxnCell, TxnId, TxnState};

/// One version of a record
#[derive(Debug, Clone)]
pub struct RecordVersion {
    key: RecordKey,
    payload: Document,
    tombstone: bool,
    owner: Arc<TxnCell>,
}

impl RecordVersion {
    /// A version carrying a document
    pub fn new(key: RecordKey, payload: Document, owner: Arc<TxnCell>) -> Self {
        Self {
            key,
            payload,
            tombstone: false,
            owner,
        }
    }

    /// A version recording deletion of the record
    pub fn tombstone(key: RecordKey, owner: Arc<TxnCell>) -> Self {
        Self {
            key,
            payload: Document::new(),
            tombstone: true,
            owner,
        }
    }

    /// Record identity
    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    /// Document payload (empty for tombstones)
    pub fn payload(&self) -> &Document {
        &self.payload
    }

    /// Check if this version deletes the record
    pub fn is_tombstone(&self) -> bool {
        self.tombstone
    }

    /// Creating transaction
    pub fn txn_id(&self) -> TxnId {
        self.owner.id()
    }

    /// Current state of the creating transaction
    #[inline]
    pub fn owner_state(&self) -> TxnState {
        self.owner.state()
    }

    /// Visibility timestamp: the commit timestamp, once committed
    pub fn visible_at(&self) -> Option<Timestamp> {
        match self.owner.state() {
            TxnState::Committed(ts) => Some(ts),
            _ => None,
        }
    }
}
