//! Operation profiler
//!
//! Keeps the most recent operation profiles in a bounded ring buffer. Each
//! profile carries the prepare read conflicts the operation ran into and how
//! long it was parked, which is how a slow read blocked behind a prepared
//! transaction shows up after the fact.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tarn_concurrency::OperationStats;
use tarn_core::TxnId;
use tracing::info;

use crate::database::config::{ProfileLevel, ProfilerConfig};

/// Kind of profiled operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// Query
    Find,
    /// Insert
    Insert,
    /// Update
    Update,
    /// Delete
    Delete,
}

impl OpKind {
    /// Lowercase operation name
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Find => "find",
            OpKind::Insert => "insert",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
        }
    }
}

/// One recorded operation
#[derive(Debug, Clone, Serialize)]
pub struct OperationProfile {
    /// Operation kind
    pub op: OpKind,
    /// Collection the operation ran on
    pub ns: String,
    /// Filter (or inserted document) as given
    pub command: serde_json::Value,
    /// Access path name (`IDHACK`, `IXSCAN`, `COLLSCAN`, ...)
    pub plan: &'static str,
    /// Attempts that ran into a prepared transaction
    pub prepare_read_conflicts: u64,
    /// Attempts made
    pub attempts: u64,
    /// Time spent parked on prepared transactions
    #[serde(serialize_with = "as_micros")]
    pub waited: Duration,
    /// Wall time of the whole operation
    #[serde(serialize_with = "as_micros")]
    pub duration: Duration,
    /// Documents returned or written
    pub n: u64,
    /// `"ok"` or the error code
    pub outcome: &'static str,
    /// Enclosing transaction, if any
    pub txn: Option<TxnId>,
    /// Completion time
    pub ts: DateTime<Utc>,
}

impl OperationProfile {
    /// Build a profile from an operation's retry statistics
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        op: OpKind,
        ns: &str,
        command: serde_json::Value,
        plan: &'static str,
        stats: &OperationStats,
        duration: Duration,
        n: u64,
        outcome: &'static str,
        txn: Option<TxnId>,
    ) -> Self {
        Self {
            op,
            ns: ns.to_string(),
            command,
            plan,
            prepare_read_conflicts: stats.prepare_read_conflicts,
            attempts: stats.attempts,
            waited: stats.waited,
            duration,
            n,
            outcome,
            txn,
            ts: Utc::now(),
        }
    }

    /// Check if the operation completed without error
    pub fn is_ok(&self) -> bool {
        self.outcome == "ok"
    }
}

fn as_micros<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_micros().min(u64::MAX as u128) as u64)
}

fn level_to_u8(level: ProfileLevel) -> u8 {
    match level {
        ProfileLevel::Off => 0,
        ProfileLevel::Slow => 1,
        ProfileLevel::All => 2,
    }
}

fn level_from_u8(raw: u8) -> ProfileLevel {
    match raw {
        0 => ProfileLevel::Off,
        1 => ProfileLevel::Slow,
        _ => ProfileLevel::All,
    }
}

/// Bounded in-memory operation profile
pub struct Profiler {
    level: AtomicU8,
    slow_ms: AtomicU64,
    capacity: usize,
    entries: Mutex<VecDeque<OperationProfile>>,
}

impl Profiler {
    /// Create a profiler from configuration
    pub fn new(config: &ProfilerConfig) -> Self {
        Self {
            level: AtomicU8::new(level_to_u8(config.level)),
            slow_ms: AtomicU64::new(config.slow_ms),
            capacity: config.capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Current level
    pub fn level(&self) -> ProfileLevel {
        level_from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Slow operation threshold
    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_ms.load(Ordering::Relaxed))
    }

    /// Change level and slow threshold at runtime
    pub fn set_level(&self, level: ProfileLevel, slow_ms: u64) {
        self.level.store(level_to_u8(level), Ordering::Relaxed);
        self.slow_ms.store(slow_ms, Ordering::Relaxed);
    }

    /// Record a finished operation
    ///
    /// Slow operations are logged whatever the level; they are kept only
    /// when the level asks for them.
    pub fn record(&self, profile: OperationProfile) {
        let slow = profile.duration >= self.slow_threshold();
        if slow {
            info!(
                target: "tarn::profile",
                op = profile.op.name(),
                ns = %profile.ns,
                command = %profile.command,
                plan = profile.plan,
                prepare_read_conflicts = profile.prepare_read_conflicts,
                duration_ms = profile.duration.as_millis() as u64,
                outcome = profile.outcome,
                "Slow operation"
            );
        }

        let keep = match self.level() {
            ProfileLevel::Off => false,
            ProfileLevel::Slow => slow,
            ProfileLevel::All => true,
        };
        if !keep {
            return;
        }

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(profile);
    }

    /// Recorded profiles, oldest first
    pub fn entries(&self) -> Vec<OperationProfile> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Recorded profiles matching `pred`, oldest first
    pub fn find(&self, pred: impl Fn(&OperationProfile) -> bool) -> Vec<OperationProfile> {
        self.entries.lock().iter().filter(|p| pred(p)).cloned().collect()
    }

    /// Drop every recorded profile
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of recorded profiles
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if nothing is recorded
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
