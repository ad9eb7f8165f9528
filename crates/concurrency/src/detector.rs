//! Conflict detection against prepared transactions
//!
//! The detector decides what a snapshot may observe of a record's history.
//! It never blocks: an unresolved prepared version is reported as
//! `PrepareConflict` and the caller's retry scheduler decides what to do.
//!
//! ## Visibility Rules
//!
//! Versions are walked newest first. The first rule that matches wins.
//!
//! | Version owner              | Outcome                                   |
//! |----------------------------|-------------------------------------------|
//! | the snapshot's own txn     | visible (own writes)                      |
//! | committed at ts <= read_ts | visible; a tombstone is `Invisible`       |
//! | committed at ts > read_ts  | skip                                      |
//! | aborted                    | skip                                      |
//! | prepared                   | `PrepareConflict`, even over older data   |
//! | active                     | skip (never visible, never blocks)        |
//!
//! Transaction states are read at evaluation time, so evaluating the same
//! snapshot again after the blocking transaction resolves yields a fresh
//! answer.

use std::sync::Arc;

use tarn_core::{Error, KeyRange, RecordKey, Result, TxnId, TxnState};
use tarn_storage::{RecordVersion, VersionChain, VersionStore};
use tracing::trace;

use crate::registry::TransactionRegistry;
use crate::snapshot::Snapshot;

/// What a snapshot observes for one record
#[derive(Debug, Clone)]
pub enum Resolution {
    /// A live version is visible
    Visible(Arc<RecordVersion>),
    /// No version is visible (never written, deleted, or not yet committed)
    Invisible,
    /// A prepared transaction's version must be resolved first
    PrepareConflict(TxnId),
}

impl Resolution {
    /// Blocking transaction, if this is a conflict
    pub fn conflict(&self) -> Option<TxnId> {
        match self {
            Resolution::PrepareConflict(txn) => Some(*txn),
            _ => None,
        }
    }
}

/// Outcome of a phantom check over a scan range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeResolution {
    /// No prepared transaction may affect the range
    Clear,
    /// A prepared transaction's intents overlap the range
    PrepareConflict(TxnId),
}

/// Outcome of a conflict-checked write
#[derive(Debug, Clone)]
pub enum WriteResolution {
    /// The version was appended
    Applied {
        /// The appended version
        version: Arc<RecordVersion>,
        /// Version the writer's snapshot observed before the write, if any
        previous: Option<Arc<RecordVersion>>,
    },
    /// The newest version belongs to a prepared transaction
    PrepareConflict(TxnId),
}

enum Rejected {
    Prepared(TxnId),
    Failed(Error),
}

/// Resolves visibility of record versions against snapshots
pub struct ConflictDetector {
    store: Arc<VersionStore>,
    registry: Arc<TransactionRegistry>,
}

impl ConflictDetector {
    /// Create a detector over `store`
    pub fn new(store: Arc<VersionStore>, registry: Arc<TransactionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Underlying version store
    pub fn store(&self) -> &Arc<VersionStore> {
        &self.store
    }

    /// Transaction registry used for phantom checks
    pub fn registry(&self) -> &Arc<TransactionRegistry> {
        &self.registry
    }

    /// Resolve one record for `snapshot`
    pub fn resolve(&self, key: &RecordKey, snapshot: &Snapshot) -> Resolution {
        let resolution = resolve_versions(&self.store.read(key), snapshot);
        if let Resolution::PrepareConflict(txn) = resolution {
            trace!(target: "tarn::conflict", key = %key, blocking = %txn, "Prepare conflict");
        }
        resolution
    }

    /// Check `range` against every other prepared transaction's intents
    pub fn resolve_range(&self, range: &KeyRange, snapshot: &Snapshot) -> RangeResolution {
        match self.registry.prepared_overlapping(range, snapshot.owner()) {
            Some(txn) => {
                trace!(target: "tarn::conflict", range = %range, blocking = %txn, "Phantom conflict");
                RangeResolution::PrepareConflict(txn)
            }
            None => RangeResolution::Clear,
        }
    }

    /// Append `version` to its record if no other writer got in the way
    ///
    /// Checked and appended under the record's shard lock:
    /// - newest foreign version prepared: `PrepareConflict` (wait and retry)
    /// - newest foreign version active, or committed after `snapshot`:
    ///   `WriteConflict`
    /// - `expect_absent` and a live version is visible: `DuplicateKey`
    ///
    /// The version must belong to the snapshot's own transaction.
    pub fn write(
        &self,
        version: RecordVersion,
        snapshot: &Snapshot,
        expect_absent: bool,
    ) -> Result<WriteResolution> {
        let key = version.key().clone();
        let version = Arc::new(version);
        let mut previous = None;
        let outcome = self.store.append_with(&key, |chain| {
            previous = check_write(chain, &key, snapshot, expect_absent)?;
            Ok(Arc::clone(&version))
        });

        match outcome {
            Ok(()) => Ok(WriteResolution::Applied { version, previous }),
            Err(Rejected::Prepared(txn)) => {
                trace!(target: "tarn::conflict", key = %key, blocking = %txn, "Write blocked by prepared txn");
                Ok(WriteResolution::PrepareConflict(txn))
            }
            Err(Rejected::Failed(e)) => Err(e),
        }
    }
}

/// Resolve a newest-first history for `snapshot`
pub fn resolve_versions(versions: &[Arc<RecordVersion>], snapshot: &Snapshot) -> Resolution {
    for version in versions {
        if snapshot.owns(version.txn_id()) {
            return visible_or_deleted(version);
        }
        match version.owner_state() {
            TxnState::Committed(ts) if ts <= snapshot.read_ts() => {
                return visible_or_deleted(version);
            }
            TxnState::Prepared => return Resolution::PrepareConflict(version.txn_id()),
            TxnState::Committed(_) | TxnState::Aborted | TxnState::Active => continue,
        }
    }
    Resolution::Invisible
}

fn visible_or_deleted(version: &Arc<RecordVersion>) -> Resolution {
    if version.is_tombstone() {
        Resolution::Invisible
    } else {
        Resolution::Visible(Arc::clone(version))
    }
}

/// Returns the version the writer's snapshot sees, if the write may proceed
fn check_write(
    chain: Option<&VersionChain>,
    key: &RecordKey,
    snapshot: &Snapshot,
    expect_absent: bool,
) -> std::result::Result<Option<Arc<RecordVersion>>, Rejected> {
    let Some(chain) = chain else {
        return Ok(None);
    };
    for version in chain.iter() {
        if snapshot.owns(version.txn_id()) {
            return live_unless_duplicate(version, key, expect_absent);
        }
        match version.owner_state() {
            TxnState::Aborted => continue,
            TxnState::Prepared => return Err(Rejected::Prepared(version.txn_id())),
            TxnState::Active => {
                return Err(Rejected::Failed(Error::WriteConflict { key: key.clone() }))
            }
            TxnState::Committed(ts) if ts > snapshot.read_ts() => {
                return Err(Rejected::Failed(Error::WriteConflict { key: key.clone() }))
            }
            TxnState::Committed(_) => return live_unless_duplicate(version, key, expect_absent),
        }
    }
    Ok(None)
}

fn live_unless_duplicate(
    version: &Arc<RecordVersion>,
    key: &RecordKey,
    expect_absent: bool,
) -> std::result::Result<Option<Arc<RecordVersion>>, Rejected> {
    if version.is_tombstone() {
        return Ok(None);
    }
    if expect_absent {
        return Err(Rejected::Failed(Error::DuplicateKey(key.clone())));
    }
    Ok(Some(Arc::clone(version)))
}
