//! Conflict and transaction metrics
//!
//! # Memory Ordering
//!
//! All counters use Relaxed ordering. They are observational only and do
//! not synchronize any other memory; approximate cross-counter consistency
//! is acceptable.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::notifier::WakeReason;

/// Global prepare-conflict counters
#[derive(Debug, Default)]
pub struct ConflictMetrics {
    prepare_conflicts: AtomicU64,
    write_conflicts: AtomicU64,
    waits: AtomicU64,
    notified_wakes: AtomicU64,
    tick_wakes: AtomicU64,
    timeouts: AtomicU64,
    wait_micros: AtomicU64,
}

impl ConflictMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// An attempt observed a prepared version
    pub fn record_prepare_conflict(&self) {
        self.prepare_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// A write lost to a concurrent writer
    pub fn record_write_conflict(&self) {
        self.write_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// A parked operation resumed
    pub fn record_wake(&self, reason: WakeReason, waited_micros: u64) {
        self.waits.fetch_add(1, Ordering::Relaxed);
        self.wait_micros.fetch_add(waited_micros, Ordering::Relaxed);
        match reason {
            WakeReason::Notified => self.notified_wakes.fetch_add(1, Ordering::Relaxed),
            WakeReason::Tick => self.tick_wakes.fetch_add(1, Ordering::Relaxed),
            WakeReason::Deadline => 0,
        };
    }

    /// An operation gave up waiting
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values
    pub fn snapshot(&self) -> ConflictStats {
        ConflictStats {
            prepare_conflicts: self.prepare_conflicts.load(Ordering::Relaxed),
            write_conflicts: self.write_conflicts.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            notified_wakes: self.notified_wakes.load(Ordering::Relaxed),
            tick_wakes: self.tick_wakes.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            wait_micros: self.wait_micros.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ConflictMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictStats {
    /// Attempts that observed a prepared version or prepared intent
    pub prepare_conflicts: u64,
    /// Writes rejected by a concurrent writer
    pub write_conflicts: u64,
    /// Times a parked operation resumed
    pub waits: u64,
    /// Resumptions caused by the blocking transaction resolving
    pub notified_wakes: u64,
    /// Resumptions caused by the fallback poll
    pub tick_wakes: u64,
    /// Operations that failed with `MaxTimeExpired`
    pub timeouts: u64,
    /// Total time spent parked, in microseconds
    pub wait_micros: u64,
}

impl ConflictStats {
    /// Share of wakes delivered by notification rather than polling
    pub fn notify_ratio(&self) -> f64 {
        let woken = self.notified_wakes + self.tick_wakes;
        if woken > 0 {
            self.notified_wakes as f64 / woken as f64
        } else {
            0.0
        }
    }
}

/// Transaction lifecycle metrics
#[derive(Debug, Clone, Default)]
pub struct TransactionMetrics {
    /// Number of currently active or prepared transactions
    pub active_count: u64,
    /// Total number of transactions started
    pub total_started: u64,
    /// Total number of transactions prepared
    pub total_prepared: u64,
    /// Total number of transactions committed
    pub total_committed: u64,
    /// Total number of transactions aborted
    pub total_aborted: u64,
    /// Commit success rate (committed / started)
    pub commit_rate: f64,
}

impl TransactionMetrics {
    /// Total transactions that completed (committed + aborted)
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_aborted
    }

    /// Abort rate (aborted / started)
    pub fn abort_rate(&self) -> f64 {
        if self.total_started > 0 {
            self.total_aborted as f64 / self.total_started as f64
        } else {
            0.0
        }
    }
}
