//! Version chain for MVCC - stores multiple versions of a record
//!
//! Versions are stored in descending order (newest first) so the conflict
//! detector can walk from the most recent write backwards and stop at the
//! first version its snapshot can see.
//!
//! # Performance
//!
//! Uses VecDeque for O(1) push_front of new versions and O(1) pop_back when
//! reclaiming the oldest ones.

use std::collections::VecDeque;
use std::sync::Arc;

use tarn_core::{Timestamp, TxnState};

use crate::version::RecordVersion;

/// Ordered history of one record, newest first
#[derive(Debug, Clone, Default)]
pub struct VersionChain {
    versions: VecDeque<Arc<RecordVersion>>,
}

impl VersionChain {
    /// Create a new version chain with a single version
    pub fn new(version: Arc<RecordVersion>) -> Self {
        let mut versions = VecDeque::with_capacity(4);
        versions.push_front(version);
        Self { versions }
    }

    /// Add a new version at the head of the chain
    ///
    /// A transaction has at most one pending version per record: if the head
    /// already belongs to the same still-active transaction it is replaced
    /// instead of stacked.
    pub fn push(&mut self, version: Arc<RecordVersion>) {
        if let Some(head) = self.versions.front() {
            if head.txn_id() == version.txn_id() && head.owner_state() == TxnState::Active {
                self.versions[0] = version;
                return;
            }
        }
        self.versions.push_front(version);
    }

    /// Newest version
    #[inline]
    pub fn latest(&self) -> Option<&Arc<RecordVersion>> {
        self.versions.front()
    }

    /// Iterate newest first
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RecordVersion>> {
        self.versions.iter()
    }

    /// Copy of the history, newest first
    ///
    /// Only `Arc` reference counts are bumped; payloads are shared.
    pub fn to_vec(&self) -> Vec<Arc<RecordVersion>> {
        self.versions.iter().cloned().collect()
    }

    /// Drop versions no snapshot at or after `horizon` can reach
    ///
    /// - Aborted versions are never visible and always go.
    /// - Below the newest version committed at or before `horizon`, nothing
    ///   is reachable: every snapshot still running would stop there first.
    ///
    /// Returns the number of versions removed.
    pub fn reclaim(&mut self, horizon: Timestamp) -> usize {
        let before = self.versions.len();
        self.versions
            .retain(|v| v.owner_state() != TxnState::Aborted);

        let floor = self.versions.iter().position(|v| {
            matches!(v.owner_state(), TxnState::Committed(ts) if ts <= horizon)
        });
        if let Some(pos) = floor {
            self.versions.truncate(pos + 1);
        }
        before - self.versions.len()
    }

    /// Check if the record no longer exists for any snapshot at or after
    /// `horizon`
    ///
    /// True for an empty chain, or one whose only version is a tombstone
    /// committed at or before `horizon`.
    pub fn is_dead(&self, horizon: Timestamp) -> bool {
        match self.versions.len() {
            0 => true,
            1 => {
                let only = &self.versions[0];
                only.is_tombstone()
                    && matches!(only.owner_state(), TxnState::Committed(ts) if ts <= horizon)
            }
            _ => false,
        }
    }

    /// Number of versions stored
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    /// Check if the version chain is empty
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
