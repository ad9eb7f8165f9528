//! Read snapshots and the reclamation horizon
//!
//! A `Snapshot` is the fixed point in logical time an operation reads at,
//! plus the transaction it belongs to (if any) so that transaction sees its
//! own pending writes.
//!
//! `SnapshotTracker` keeps a refcount per live read timestamp. The oldest
//! one is the horizon below which version history may be reclaimed.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tarn_core::{Timestamp, TxnId};

/// Immutable read point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    read_ts: Timestamp,
    owner: Option<TxnId>,
}

impl Snapshot {
    /// Snapshot of a non-transactional read at `read_ts`
    pub fn at(read_ts: Timestamp) -> Self {
        Self {
            read_ts,
            owner: None,
        }
    }

    /// Snapshot of transaction `owner`, started at `read_ts`
    pub fn for_txn(read_ts: Timestamp, owner: TxnId) -> Self {
        Self {
            read_ts,
            owner: Some(owner),
        }
    }

    /// Read timestamp
    #[inline]
    pub fn read_ts(&self) -> Timestamp {
        self.read_ts
    }

    /// Owning transaction
    #[inline]
    pub fn owner(&self) -> Option<TxnId> {
        self.owner
    }

    /// Check if `txn` is the owning transaction
    #[inline]
    pub fn owns(&self, txn: TxnId) -> bool {
        self.owner == Some(txn)
    }
}

/// Refcounted set of live read timestamps
#[derive(Debug, Default)]
pub struct SnapshotTracker {
    active: Mutex<BTreeMap<Timestamp, usize>>,
}

impl SnapshotTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a read timestamp produced by `read_ts`
    ///
    /// The timestamp is drawn while the tracker is locked, so a concurrent
    /// [`horizon`](Self::horizon) either sees this registration or returns a
    /// value no greater than the timestamp drawn.
    pub fn acquire(self: &Arc<Self>, read_ts: impl FnOnce() -> Timestamp) -> SnapshotGuard {
        let mut active = self.active.lock();
        let ts = read_ts();
        *active.entry(ts).or_insert(0) += 1;
        SnapshotGuard {
            tracker: Arc::clone(self),
            ts,
        }
    }

    /// Oldest live read timestamp, or `now()` when none are live
    pub fn horizon(&self, now: impl FnOnce() -> Timestamp) -> Timestamp {
        let active = self.active.lock();
        match active.keys().next() {
            Some(oldest) => *oldest,
            None => now(),
        }
    }

    /// Number of live snapshots
    pub fn active_count(&self) -> usize {
        self.active.lock().values().sum()
    }

    fn release(&self, ts: Timestamp) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&ts) {
            *count -= 1;
            if *count == 0 {
                active.remove(&ts);
            }
        }
    }
}

/// Keeps a read timestamp live until dropped
#[derive(Debug)]
pub struct SnapshotGuard {
    tracker: Arc<SnapshotTracker>,
    ts: Timestamp,
}

impl SnapshotGuard {
    /// The registered read timestamp
    pub fn read_ts(&self) -> Timestamp {
        self.ts
    }
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        self.tracker.release(self.ts);
    }
}
