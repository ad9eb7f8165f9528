//! Resolution notifier
//!
//! Wakes operations parked on a prepared transaction when that transaction
//! commits or aborts.
//!
//! Each blocking transaction gets one wake channel, shared by every waiter
//! registered against it. `notify` detaches the channel, marks it fired and
//! wakes everyone parked on it. A waiter that registers after `notify` gets a
//! fresh channel that will never fire; the scheduler guards against that by
//! re-checking the transaction's state after registering, and by its
//! fallback tick.
//!
//! Delivery is an optimization. Correctness only depends on waiters
//! re-evaluating visibility after every wake, whatever its cause.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tarn_core::TxnId;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

/// Why a parked waiter resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// The blocking transaction resolved
    Notified,
    /// The fallback poll interval elapsed
    Tick,
    /// The operation's deadline passed
    Deadline,
}

#[derive(Debug, Default)]
struct WakeChannel {
    notify: Notify,
    fired: AtomicBool,
    waiters: AtomicUsize,
}

/// Per-transaction wake channels
#[derive(Debug, Default)]
pub struct ResolutionNotifier {
    channels: DashMap<TxnId, Arc<WakeChannel>>,
}

impl ResolutionNotifier {
    /// Create a notifier with no registrations
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `txn` resolving
    ///
    /// The registration lasts until the returned waiter is dropped.
    pub fn register(self: &Arc<Self>, txn: TxnId) -> ConflictWaiter {
        let channel = {
            let entry = self.channels.entry(txn).or_default();
            entry.waiters.fetch_add(1, Ordering::AcqRel);
            Arc::clone(entry.value())
        };
        ConflictWaiter {
            txn,
            channel,
            notifier: Arc::clone(self),
        }
    }

    /// Wake every waiter registered against `txn` and clear the registrations
    ///
    /// Must only be called after `txn`'s resolved state is published.
    pub fn notify(&self, txn: TxnId) {
        if let Some((_, channel)) = self.channels.remove(&txn) {
            channel.fired.store(true, Ordering::Release);
            channel.notify.notify_waiters();
            trace!(
                target: "tarn::conflict",
                txn_id = %txn,
                waiters = channel.waiters.load(Ordering::Acquire),
                "Woke waiters"
            );
        }
    }

    /// Number of waiters currently registered against `txn`
    pub fn waiting_on(&self, txn: TxnId) -> usize {
        self.channels
            .get(&txn)
            .map(|ch| ch.waiters.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Number of transactions with at least one registration
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// A parked operation's registration against a blocking transaction
///
/// Dropping the waiter deregisters it.
#[derive(Debug)]
pub struct ConflictWaiter {
    txn: TxnId,
    channel: Arc<WakeChannel>,
    notifier: Arc<ResolutionNotifier>,
}

impl ConflictWaiter {
    /// Transaction this waiter is blocked on
    pub fn blocking_txn(&self) -> TxnId {
        self.txn
    }

    /// Check if the transaction has already been announced as resolved
    pub fn is_fired(&self) -> bool {
        self.channel.fired.load(Ordering::Acquire)
    }

    /// Park until notified, `tick` elapses, or `deadline` passes
    pub async fn wait(&self, tick: Duration, deadline: Instant) -> WakeReason {
        let notified = self.channel.notify.notified();
        tokio::pin!(notified);
        // Enable before checking `fired` so a notify in between is not lost
        notified.as_mut().enable();
        if self.is_fired() {
            return WakeReason::Notified;
        }

        tokio::select! {
            _ = &mut notified => WakeReason::Notified,
            _ = tokio::time::sleep_until(deadline) => WakeReason::Deadline,
            _ = tokio::time::sleep(tick) => WakeReason::Tick,
        }
    }
}

impl Drop for ConflictWaiter {
    fn drop(&mut self) {
        let remaining = self.channel.waiters.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            let channel = &self.channel;
            self.notifier.channels.remove_if(&self.txn, |_, current| {
                Arc::ptr_eq(current, channel) && current.waiters.load(Ordering::Acquire) == 0
            });
        }
    }
}
