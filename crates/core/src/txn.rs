//! Transaction state and the shared resolution cell
//!
//! Every transaction owns one `TxnCell`. The registry holds it, and every
//! record version the transaction writes holds a clone of the same `Arc`, so
//! publishing the commit timestamp in the cell makes all of the
//! transaction's versions visible in one atomic store.
//!
//! ## Encoding
//!
//! The cell packs the state into a single `AtomicU64`:
//!
//! ```text
//! 0                   active
//! 1                   prepared
//! 2                   aborted
//! 1 << 63 | ts        committed at ts
//! ```
//!
//! Transitions are compare-and-swap, so concurrent transition attempts on
//! the same transaction cannot both succeed.

use crate::timestamp::Timestamp;
use crate::types::TxnId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

const ACTIVE: u64 = 0;
const PREPARED: u64 = 1;
const ABORTED: u64 = 2;
const COMMITTED_FLAG: u64 = 1 << 63;

/// Lifecycle state of a transaction
///
/// State transitions:
/// - `Active` → `Prepared` (prepare)
/// - `Prepared` → `Committed` (commit)
/// - `Prepared` → `Aborted` (abort)
/// - `Active` → `Aborted` (abort)
///
/// Terminal states (no transitions allowed):
/// - `Committed`
/// - `Aborted`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnState {
    /// Executing; writes are pending and never visible to others
    Active,
    /// Durable intent to commit; outcome not yet known
    Prepared,
    /// Committed at the given timestamp
    Committed(Timestamp),
    /// Rolled back; its versions are permanently invisible
    Aborted,
}

impl TxnState {
    /// Check if the state is terminal
    pub fn is_resolved(&self) -> bool {
        matches!(self, TxnState::Committed(_) | TxnState::Aborted)
    }

    /// Short lowercase name of the state
    pub fn name(&self) -> &'static str {
        match self {
            TxnState::Active => "active",
            TxnState::Prepared => "prepared",
            TxnState::Committed(_) => "committed",
            TxnState::Aborted => "aborted",
        }
    }

    fn encode(self) -> u64 {
        match self {
            TxnState::Active => ACTIVE,
            TxnState::Prepared => PREPARED,
            TxnState::Aborted => ABORTED,
            TxnState::Committed(ts) => {
                debug_assert!(ts <= Timestamp::MAX, "commit timestamp overflows cell");
                COMMITTED_FLAG | ts.as_u64()
            }
        }
    }

    fn decode(word: u64) -> Self {
        if word & COMMITTED_FLAG != 0 {
            return TxnState::Committed(Timestamp::from_raw(word & !COMMITTED_FLAG));
        }
        match word {
            ACTIVE => TxnState::Active,
            PREPARED => TxnState::Prepared,
            _ => TxnState::Aborted,
        }
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnState::Committed(ts) => write!(f, "committed@{}", ts),
            other => f.write_str(other.name()),
        }
    }
}

/// Lock-free state cell shared by a transaction and all of its versions
#[derive(Debug)]
pub struct TxnCell {
    id: TxnId,
    word: AtomicU64,
}

impl TxnCell {
    /// Create a cell for a new, active transaction
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            word: AtomicU64::new(ACTIVE),
        }
    }

    /// Owning transaction
    #[inline]
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Current state (Acquire: observes everything published before the
    /// transition)
    #[inline]
    pub fn state(&self) -> TxnState {
        TxnState::decode(self.word.load(Ordering::Acquire))
    }

    /// Atomically move from `from` to `to`
    ///
    /// Returns the state actually observed when the swap fails. Transition
    /// legality is the caller's concern; this only guarantees atomicity.
    pub fn transition(&self, from: TxnState, to: TxnState) -> Result<(), TxnState> {
        self.word
            .compare_exchange(from.encode(), to.encode(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(TxnState::decode)
    }
}
