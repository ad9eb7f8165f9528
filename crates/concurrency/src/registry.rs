//! Transaction registry
//!
//! Owns every live transaction record and drives the lifecycle:
//!
//! ```text
//! active ──prepare──► prepared ──commit──► committed
//!    │                   │
//!    └──────abort────────┴─────abort─────► aborted
//! ```
//!
//! Records live in a DashMap keyed by transaction id, so lookups never
//! contend on a global lock. State itself is the record's `TxnCell`, shared
//! with every version the transaction wrote; each transition is a single
//! compare-and-swap on that cell.
//!
//! ## Resolution Sequence
//!
//! ```text
//! 1. CAS the cell to committed(ts) / aborted   (versions become visible / dead)
//! 2. Drop the prepared intent set              (phantom checks stop matching)
//! 3. Release the transaction's snapshot        (horizon may advance)
//! 4. notify(txn)                               (parked operations re-evaluate)
//! ```
//!
//! Waiters never miss step 4's effect: they either observe the published
//! state when they re-check after registering, or are woken by it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tarn_core::{Error, KeyRange, Result, Timestamp, TxnCell, TxnId, TxnState};
use tracing::{debug, info};

use crate::clock::LogicalClock;
use crate::intent::IntentSet;
use crate::metrics::TransactionMetrics;
use crate::notifier::ResolutionNotifier;
use crate::snapshot::{Snapshot, SnapshotGuard, SnapshotTracker};

/// One transaction's registry entry
#[derive(Debug)]
pub struct TxnRecord {
    cell: Arc<TxnCell>,
    start_ts: Timestamp,
    prepare_ts: AtomicU64,
    snapshot: Mutex<Option<SnapshotGuard>>,
}

impl TxnRecord {
    /// Transaction id
    pub fn id(&self) -> TxnId {
        self.cell.id()
    }

    /// Shared resolution cell (handed to every version the transaction writes)
    pub fn cell(&self) -> &Arc<TxnCell> {
        &self.cell
    }

    /// Current state
    pub fn state(&self) -> TxnState {
        self.cell.state()
    }

    /// Start timestamp (the transaction's read point)
    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    /// Prepare timestamp, once prepared
    pub fn prepare_ts(&self) -> Option<Timestamp> {
        match self.prepare_ts.load(Ordering::Acquire) {
            0 => None,
            raw => Some(Timestamp::from_raw(raw)),
        }
    }

    /// Commit timestamp, once committed
    pub fn commit_ts(&self) -> Option<Timestamp> {
        match self.cell.state() {
            TxnState::Committed(ts) => Some(ts),
            _ => None,
        }
    }

    /// Read snapshot of this transaction
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::for_txn(self.start_ts, self.id())
    }
}

/// Registry of transactions and their prepared intents
pub struct TransactionRegistry {
    clock: Arc<LogicalClock>,
    snapshots: Arc<SnapshotTracker>,
    notifier: Arc<ResolutionNotifier>,
    next_id: AtomicU64,
    records: DashMap<TxnId, Arc<TxnRecord>>,
    prepared: DashMap<TxnId, Arc<IntentSet>>,
    /// Active + prepared count (for metrics) - uses Relaxed ordering
    active_count: AtomicU64,
    total_started: AtomicU64,
    total_prepared: AtomicU64,
    total_committed: AtomicU64,
    total_aborted: AtomicU64,
}

impl TransactionRegistry {
    /// Create a registry drawing timestamps from `clock`
    pub fn new(
        clock: Arc<LogicalClock>,
        snapshots: Arc<SnapshotTracker>,
        notifier: Arc<ResolutionNotifier>,
    ) -> Self {
        Self {
            clock,
            snapshots,
            notifier,
            next_id: AtomicU64::new(1),
            records: DashMap::new(),
            prepared: DashMap::new(),
            active_count: AtomicU64::new(0),
            total_started: AtomicU64::new(0),
            total_prepared: AtomicU64::new(0),
            total_committed: AtomicU64::new(0),
            total_aborted: AtomicU64::new(0),
        }
    }

    /// Transaction clock
    pub fn clock(&self) -> &Arc<LogicalClock> {
        &self.clock
    }

    /// Live snapshot tracker
    pub fn snapshots(&self) -> &Arc<SnapshotTracker> {
        &self.snapshots
    }

    /// Resolution notifier fired on commit and abort
    pub fn notifier(&self) -> &Arc<ResolutionNotifier> {
        &self.notifier
    }

    /// Start a transaction
    ///
    /// The start timestamp is a fresh tick and stays registered with the
    /// snapshot tracker until the transaction resolves.
    pub fn begin(&self) -> TxnId {
        let id = TxnId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let guard = self.snapshots.acquire(|| self.clock.tick());
        let record = Arc::new(TxnRecord {
            cell: Arc::new(TxnCell::new(id)),
            start_ts: guard.read_ts(),
            prepare_ts: AtomicU64::new(0),
            snapshot: Mutex::new(Some(guard)),
        });
        self.records.insert(id, Arc::clone(&record));

        self.active_count.fetch_add(1, Ordering::Relaxed);
        self.total_started.fetch_add(1, Ordering::Relaxed);
        debug!(target: "tarn::txn", txn_id = %id, start_ts = %record.start_ts, "Transaction started");
        id
    }

    /// Look up a transaction record
    pub fn get(&self, txn: TxnId) -> Result<Arc<TxnRecord>> {
        self.records
            .get(&txn)
            .map(|r| Arc::clone(r.value()))
            .ok_or(Error::TransactionNotFound(txn))
    }

    /// Current state of a transaction (non-blocking)
    pub fn status(&self, txn: TxnId) -> Result<TxnState> {
        self.get(txn).map(|r| r.state())
    }

    /// Check if `txn` has committed or aborted
    ///
    /// Forgotten transactions are resolved by construction.
    pub fn is_resolved(&self, txn: TxnId) -> bool {
        match self.records.get(&txn) {
            Some(record) => record.state().is_resolved(),
            None => true,
        }
    }

    /// Move `txn` from active to prepared and freeze its intents
    pub fn prepare(&self, txn: TxnId, intents: IntentSet) -> Result<Timestamp> {
        let record = self.get(txn)?;
        let state = record.state();
        if state != TxnState::Active {
            return Err(Error::InvalidTransition {
                txn_id: txn,
                from: state,
                to: "prepared",
            });
        }

        // Intents go up before the state flips: a reader may see them early
        // and wait, but never sees the prepared state without them.
        self.prepared.insert(txn, Arc::new(intents));
        let prepare_ts = self.clock.tick();
        record.prepare_ts.store(prepare_ts.as_u64(), Ordering::Release);
        if let Err(from) = record.cell.transition(TxnState::Active, TxnState::Prepared) {
            self.prepared.remove(&txn);
            record.prepare_ts.store(0, Ordering::Release);
            return Err(Error::InvalidTransition {
                txn_id: txn,
                from,
                to: "prepared",
            });
        }

        self.total_prepared.fetch_add(1, Ordering::Relaxed);
        debug!(target: "tarn::txn", txn_id = %txn, prepare_ts = %prepare_ts, "Transaction prepared");
        Ok(prepare_ts)
    }

    /// Move `txn` from prepared to committed
    ///
    /// All of the transaction's versions become visible at the returned
    /// timestamp in one atomic step. Waiters are notified before returning.
    pub fn commit(&self, txn: TxnId) -> Result<Timestamp> {
        let record = self.get(txn)?;
        let commit_ts = self.clock.tick();
        record
            .cell
            .transition(TxnState::Prepared, TxnState::Committed(commit_ts))
            .map_err(|from| Error::InvalidTransition {
                txn_id: txn,
                from,
                to: "committed",
            })?;

        self.finish(&record);
        self.total_committed.fetch_add(1, Ordering::Relaxed);
        info!(target: "tarn::txn", txn_id = %txn, commit_ts = %commit_ts, "Transaction committed");
        Ok(commit_ts)
    }

    /// Move `txn` from active or prepared to aborted
    ///
    /// Waiters are notified before returning.
    pub fn abort(&self, txn: TxnId) -> Result<()> {
        let record = self.get(txn)?;
        loop {
            let state = record.state();
            match state {
                TxnState::Active | TxnState::Prepared => {
                    if record.cell.transition(state, TxnState::Aborted).is_ok() {
                        break;
                    }
                }
                other => {
                    return Err(Error::InvalidTransition {
                        txn_id: txn,
                        from: other,
                        to: "aborted",
                    })
                }
            }
        }

        self.finish(&record);
        self.total_aborted.fetch_add(1, Ordering::Relaxed);
        info!(target: "tarn::txn", txn_id = %txn, "Transaction aborted");
        Ok(())
    }

    fn finish(&self, record: &TxnRecord) {
        self.prepared.remove(&record.id());
        record.snapshot.lock().take();
        let _ = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
        self.notifier.notify(record.id());
    }

    /// A prepared transaction, other than `exclude`, whose intents overlap
    /// `range`
    pub fn prepared_overlapping(&self, range: &KeyRange, exclude: Option<TxnId>) -> Option<TxnId> {
        self.prepared
            .iter()
            .filter(|entry| Some(*entry.key()) != exclude)
            .find(|entry| entry.value().overlaps(range))
            .map(|entry| *entry.key())
    }

    /// Frozen intents of a prepared transaction
    pub fn prepared_intents(&self, txn: TxnId) -> Option<Arc<IntentSet>> {
        self.prepared.get(&txn).map(|i| Arc::clone(i.value()))
    }

    /// Number of transactions currently prepared
    pub fn prepared_count(&self) -> usize {
        self.prepared.len()
    }

    /// Drop records of transactions resolved at or before `horizon`
    ///
    /// Versions keep their own handle to the resolution cell, so visibility
    /// is unaffected. Returns the number of records dropped.
    pub fn forget_resolved(&self, horizon: Timestamp) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| match record.state() {
            TxnState::Committed(ts) => ts > horizon,
            TxnState::Aborted => false,
            TxnState::Active | TxnState::Prepared => true,
        });
        before.saturating_sub(self.records.len())
    }

    /// Number of records held (live and not yet forgotten)
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no records are held
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get transaction metrics
    pub fn metrics(&self) -> TransactionMetrics {
        let started = self.total_started.load(Ordering::Relaxed);
        let committed = self.total_committed.load(Ordering::Relaxed);

        TransactionMetrics {
            active_count: self.active_count.load(Ordering::Relaxed),
            total_started: started,
            total_prepared: self.total_prepared.load(Ordering::Relaxed),
            total_committed: committed,
            total_aborted: self.total_aborted.load(Ordering::Relaxed),
            commit_rate: if started > 0 {
                committed as f64 / started as f64
            } else {
                0.0
            },
        }
    }
}
