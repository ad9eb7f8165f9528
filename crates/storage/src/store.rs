//! Sharded version store
//!
//! # Design
//!
//! - DashMap keyed by record key: map shards are striped by key hash and are
//!   only held long enough to clone a record's slot handle
//! - One mutex per record slot: a writer checking and appending on one
//!   record never holds up readers or writers of another
//! - Ordered `_id` set per collection: consulted by range scans only
//! - VersionChain per record: newest-first history
//!
//! The store never decides visibility. Reads hand back whole histories and
//! the conflict detector walks them against a snapshot. Writes that must be
//! checked against the current history go through [`VersionStore::append_with`],
//! which runs the check and the append under the record's own lock.
//!
//! Lock order is map shard, then record slot, then `_id` set. A slot removed
//! from the map is marked retired under its lock; anyone who fetched it
//! before the removal sees the mark and looks the record up again.

use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tarn_core::{KeyRange, KeySpace, RecordKey, Timestamp, Value};
use tracing::debug;

use crate::chain::VersionChain;
use crate::version::RecordVersion;

/// One record's history and its retirement mark
#[derive(Debug, Default)]
struct Slot {
    retired: bool,
    chain: VersionChain,
}

impl Slot {
    fn chain(&self) -> Option<&VersionChain> {
        (!self.chain.is_empty()).then_some(&self.chain)
    }
}

/// Outcome of one reclaim pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Versions removed from chains
    pub versions_removed: usize,
    /// Records whose whole chain was dropped
    pub records_removed: usize,
    /// Records whose history changed (index entries may need cleanup)
    pub touched: Vec<RecordKey>,
}

impl ReclaimReport {
    /// Check if the pass changed nothing
    pub fn is_empty(&self) -> bool {
        self.versions_removed == 0 && self.records_removed == 0
    }
}

/// Record histories for all collections
#[derive(Debug, Default)]
pub struct VersionStore {
    records: DashMap<RecordKey, Arc<Mutex<Slot>>>,
    ids: DashMap<String, Arc<RwLock<BTreeSet<Value>>>>,
}

impl VersionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            ids: DashMap::new(),
        }
    }

    /// Append a version unconditionally
    pub fn put(&self, version: Arc<RecordVersion>) {
        let key = version.key().clone();
        let _ = self.append_with::<_, ()>(&key, |_| Ok(version));
    }

    /// Run `check` against the record's current history and append the
    /// version it returns
    ///
    /// The record stays locked from the check until the append, so no other
    /// writer can slip a version in between. Other records are not locked.
    /// If `check` fails the store is left unchanged.
    pub fn append_with<F, E>(&self, key: &RecordKey, check: F) -> Result<(), E>
    where
        F: FnOnce(Option<&VersionChain>) -> Result<Arc<RecordVersion>, E>,
    {
        let mut check = Some(check);
        loop {
            let slot = self.slot_or_create(key);
            let mut slot = slot.lock();
            if slot.retired {
                continue;
            }
            let Some(check) = check.take() else {
                return Ok(());
            };
            match check(slot.chain()) {
                Ok(version) => {
                    slot.chain.push(version);
                    return Ok(());
                }
                Err(e) => {
                    let empty = slot.chain.is_empty();
                    drop(slot);
                    if empty {
                        self.retire_if(key, |chain| chain.is_empty());
                    }
                    return Err(e);
                }
            }
        }
    }

    /// History of one record, newest first (empty if never written)
    pub fn read(&self, key: &RecordKey) -> Vec<Arc<RecordVersion>> {
        self.with_chain(key, |chain| chain.map(VersionChain::to_vec).unwrap_or_default())
    }

    /// Run `f` over one record's history while holding the record's lock
    ///
    /// No write can land on the record until `f` returns.
    pub fn with_chain<R>(&self, key: &RecordKey, f: impl FnOnce(Option<&VersionChain>) -> R) -> R {
        loop {
            let Some(slot) = self.slot(key) else {
                return f(None);
            };
            let slot = slot.lock();
            if !slot.retired {
                return f(slot.chain());
            }
        }
    }

    /// Histories of every record whose `_id` falls in `range`, ordered by `_id`
    ///
    /// `range` must be in the collection's primary key space; any other
    /// space yields nothing. Each record is read under its own lock, one at
    /// a time.
    pub fn scan(&self, range: &KeyRange) -> Vec<(Value, Vec<Arc<RecordVersion>>)> {
        let collection = match &range.space {
            KeySpace::Primary { collection } => collection,
            KeySpace::Index { .. } => return Vec::new(),
        };
        // BTreeSet::range panics on inverted bounds
        if range.is_empty() {
            return Vec::new();
        }
        let Some(ids) = self.ids.get(collection).map(|ids| Arc::clone(ids.value())) else {
            return Vec::new();
        };
        let bounds = (as_ref_bound(&range.lower), as_ref_bound(&range.upper));
        let ids: Vec<Value> = ids.read().range::<Value, _>(bounds).cloned().collect();

        ids.into_iter()
            .filter_map(|id| {
                let versions = self.read(&RecordKey::new(collection.clone(), id.clone()));
                (!versions.is_empty()).then_some((id, versions))
            })
            .collect()
    }

    /// Number of records in a collection (including ones only pending or
    /// tombstoned)
    pub fn record_count(&self, collection: &str) -> usize {
        self.ids
            .get(collection)
            .map(|ids| ids.read().len())
            .unwrap_or(0)
    }

    /// Total versions stored across all collections
    pub fn total_versions(&self) -> usize {
        self.slots()
            .into_iter()
            .map(|(_, slot)| slot.lock().chain.version_count())
            .sum()
    }

    /// Remove a collection's histories entirely
    pub fn drop_collection(&self, collection: &str) -> bool {
        let Some((_, ids)) = self.ids.remove(collection) else {
            return false;
        };
        let ids = std::mem::take(&mut *ids.write());
        for id in ids {
            if let Some((_, slot)) = self.records.remove(&RecordKey::new(collection, id)) {
                slot.lock().retired = true;
            }
        }
        true
    }

    /// Drop every version no snapshot at or after `horizon` can observe
    ///
    /// Records left holding only a tombstone visible at the horizon are
    /// removed outright. Records are visited one at a time; a record whose
    /// lock is busy when the pass tries to remove it is left for the next
    /// pass.
    pub fn reclaim(&self, horizon: Timestamp) -> ReclaimReport {
        let mut report = ReclaimReport::default();
        for (key, slot) in self.slots() {
            let (removed, dead) = {
                let mut slot = slot.lock();
                if slot.retired {
                    continue;
                }
                let removed = slot.chain.reclaim(horizon);
                (removed, slot.chain.is_dead(horizon))
            };
            if removed > 0 {
                report.versions_removed += removed;
                report.touched.push(key.clone());
            }
            if dead {
                if let Some(remaining) = self.retire_if(&key, |chain| chain.is_dead(horizon)) {
                    report.versions_removed += remaining;
                    report.records_removed += 1;
                    if removed == 0 {
                        report.touched.push(key);
                    }
                }
            }
        }
        if !report.is_empty() {
            debug!(
                target: "tarn::storage",
                horizon = %horizon,
                versions = report.versions_removed,
                records = report.records_removed,
                "Reclaimed versions"
            );
        }
        report
    }

    fn slot(&self, key: &RecordKey) -> Option<Arc<Mutex<Slot>>> {
        self.records.get(key).map(|slot| Arc::clone(slot.value()))
    }

    fn slot_or_create(&self, key: &RecordKey) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.slot(key) {
            return slot;
        }
        let entry = self.records.entry(key.clone()).or_insert_with(|| {
            let ids = self
                .ids
                .entry(key.collection.clone())
                .or_default()
                .value()
                .clone();
            ids.write().insert(key.id.clone());
            Arc::default()
        });
        Arc::clone(entry.value())
    }

    /// Handles to every record, taken without holding any map shard after
    /// returning
    fn slots(&self) -> Vec<(RecordKey, Arc<Mutex<Slot>>)> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Remove the record if `pred` holds for its chain, returning the
    /// number of versions dropped with it
    fn retire_if(&self, key: &RecordKey, pred: impl Fn(&VersionChain) -> bool) -> Option<usize> {
        let mut dropped = None;
        self.records.remove_if(key, |_, slot| {
            // A busy record is not removed in this pass
            let Some(mut slot) = slot.try_lock() else {
                return false;
            };
            if slot.retired || !pred(&slot.chain) {
                return false;
            }
            slot.retired = true;
            dropped = Some(slot.chain.version_count());
            if let Some(ids) = self.ids.get(&key.collection) {
                ids.write().remove(&key.id);
            }
            true
        });
        dropped
    }
}

pub(crate) fn as_ref_bound(bound: &Bound<Value>) -> Bound<&Value> {
    match bound {
        Bound::Included(v) => Bound::Included(v),
        Bound::Excluded(v) => Bound::Excluded(v),
        Bound::Unbounded => Bound::Unbounded,
    }
}
