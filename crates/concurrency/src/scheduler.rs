//! Retry scheduler for operations blocked on prepared transactions
//!
//! An operation is expressed as a non-blocking attempt that either finishes
//! or names the prepared transaction in its way. The scheduler runs the
//! attempt, and on conflict parks the task until the blocking transaction
//! resolves, a fallback tick elapses, or the deadline passes.
//!
//! ## State Machine
//!
//! ```text
//!            ┌──────────── Ready ───────────► Done(T)
//!            │
//!  ──► Running ── Conflict(txn) ──► Waiting { txn, deadline }
//!            ▲                          │
//!            └── notified / tick ───────┤
//!                                       └── deadline ──► MaxTimeExpired
//! ```
//!
//! Suspension is cooperative: a parked operation is an idle future, not a
//! blocked thread. The attempt is re-run from scratch after every wake, so
//! it must not leave side effects behind when it reports a conflict.

use std::sync::Arc;
use std::time::Duration;

use tarn_core::{Error, Result, TxnId};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics::ConflictMetrics;
use crate::notifier::{ResolutionNotifier, WakeReason};
use crate::registry::TransactionRegistry;

// ============================================================================
// Retry Policy
// ============================================================================

/// Wait budget and polling behavior for blocked operations
///
/// # Example
/// ```
/// use std::time::Duration;
/// use tarn_concurrency::RetryPolicy;
///
/// let policy = RetryPolicy::new()
///     .with_default_max_wait(Duration::from_secs(5))
///     .with_poll_base_ms(2)
///     .with_poll_max_ms(50);
/// assert_eq!(policy.default_max_wait, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Wait budget used when a request does not carry its own
    pub default_max_wait: Duration,
    /// First fallback poll interval in milliseconds (exponential backoff)
    pub poll_base_ms: u64,
    /// Largest fallback poll interval in milliseconds
    pub poll_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            default_max_wait: Duration::from_secs(60),
            poll_base_ms: 5,
            poll_max_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Create a RetryPolicy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default wait budget
    pub fn with_default_max_wait(mut self, max_wait: Duration) -> Self {
        self.default_max_wait = max_wait;
        self
    }

    /// Set base poll interval for exponential backoff
    pub fn with_poll_base_ms(mut self, poll_base_ms: u64) -> Self {
        self.poll_base_ms = poll_base_ms;
        self
    }

    /// Set maximum poll interval
    pub fn with_poll_max_ms(mut self, poll_max_ms: u64) -> Self {
        self.poll_max_ms = poll_max_ms;
        self
    }

    /// Fallback poll interval before the `wait`-th re-check
    pub fn poll_interval(&self, wait: usize) -> Duration {
        // Cap the shift to prevent overflow (1 << 63 is the max for u64)
        let shift = wait.min(63);
        let multiplier = 1u64 << shift;
        let delay_ms = self.poll_base_ms.saturating_mul(multiplier);
        Duration::from_millis(delay_ms.min(self.poll_max_ms).max(1))
    }
}

// ============================================================================
// Attempts and Stats
// ============================================================================

/// Result of one non-blocking attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// The operation finished
    Ready(T),
    /// A prepared transaction must resolve first
    Conflict(TxnId),
}

/// Per-operation counters reported to the profiler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationStats {
    /// Attempts that observed a prepared version or intent
    pub prepare_read_conflicts: u64,
    /// Attempts made
    pub attempts: u64,
    /// Time spent parked
    pub waited: Duration,
    /// Last transaction the operation was blocked on
    pub blocked_on: Option<TxnId>,
}

impl OperationStats {
    /// Fold another operation's counters into these
    pub fn absorb(&mut self, other: &OperationStats) {
        self.prepare_read_conflicts += other.prepare_read_conflicts;
        self.attempts += other.attempts;
        self.waited += other.waited;
        if other.blocked_on.is_some() {
            self.blocked_on = other.blocked_on;
        }
    }
}

enum WaitState<T> {
    Running,
    Waiting { txn_id: TxnId, deadline: Instant },
    Done(T),
}

// ============================================================================
// Scheduler
// ============================================================================

/// Runs attempts to completion, parking on prepare conflicts
pub struct RetryScheduler {
    registry: Arc<TransactionRegistry>,
    notifier: Arc<ResolutionNotifier>,
    metrics: Arc<ConflictMetrics>,
    policy: RetryPolicy,
}

impl RetryScheduler {
    /// Create a scheduler
    pub fn new(
        registry: Arc<TransactionRegistry>,
        metrics: Arc<ConflictMetrics>,
        policy: RetryPolicy,
    ) -> Self {
        let notifier = Arc::clone(registry.notifier());
        Self {
            registry,
            notifier,
            metrics,
            policy,
        }
    }

    /// Active policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Global conflict counters
    pub fn metrics(&self) -> &Arc<ConflictMetrics> {
        &self.metrics
    }

    /// Run `op` until it is ready, fails, or the wait budget runs out
    ///
    /// `max_wait` overrides the policy's default budget. The deadline is
    /// fixed when this call starts. Errors from `op` are returned as-is;
    /// running out of budget yields [`Error::MaxTimeExpired`].
    pub async fn with_retry<T, F>(
        &self,
        max_wait: Option<Duration>,
        stats: &mut OperationStats,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Result<Attempt<T>>,
    {
        let deadline = Instant::now() + max_wait.unwrap_or(self.policy.default_max_wait);
        let mut waits = 0usize;
        let mut state = WaitState::Running;

        loop {
            state = match state {
                WaitState::Running => {
                    stats.attempts += 1;
                    match op()? {
                        Attempt::Ready(value) => WaitState::Done(value),
                        Attempt::Conflict(txn_id) => {
                            stats.prepare_read_conflicts += 1;
                            stats.blocked_on = Some(txn_id);
                            self.metrics.record_prepare_conflict();
                            WaitState::Waiting { txn_id, deadline }
                        }
                    }
                }
                WaitState::Waiting { txn_id, deadline } => {
                    if Instant::now() >= deadline {
                        self.metrics.record_timeout();
                        warn!(
                            target: "tarn::conflict",
                            blocking_txn = %txn_id,
                            waited_ms = stats.waited.as_millis() as u64,
                            attempts = stats.attempts,
                            "Operation exceeded time limit waiting on prepared transaction"
                        );
                        return Err(Error::MaxTimeExpired {
                            blocking_txn: txn_id,
                            waited: stats.waited,
                        });
                    }

                    let waiter = self.notifier.register(txn_id);
                    // Resolved between the attempt and registering: the
                    // notification is already gone, re-run now.
                    if self.registry.is_resolved(txn_id) {
                        WaitState::Running
                    } else {
                        let tick = self.policy.poll_interval(waits);
                        waits += 1;
                        let parked = Instant::now();
                        let reason = waiter.wait(tick, deadline).await;
                        let waited = parked.elapsed();
                        stats.waited += waited;
                        self.metrics
                            .record_wake(reason, waited.as_micros().min(u64::MAX as u128) as u64);
                        debug!(
                            target: "tarn::conflict",
                            blocking_txn = %txn_id,
                            reason = ?reason,
                            "Parked operation resumed"
                        );
                        match reason {
                            WakeReason::Deadline => WaitState::Waiting { txn_id, deadline },
                            WakeReason::Notified | WakeReason::Tick => WaitState::Running,
                        }
                    }
                }
                WaitState::Done(value) => return Ok(value),
            };
        }
    }
}
