//! Version reclamation background task
//!
//! Periodically drops versions no live snapshot can observe, cleans index
//! entries they were backing, and forgets resolved transaction records.
//!
//! The horizon is the oldest read timestamp still registered with the
//! snapshot tracker. Active and prepared transactions hold their start
//! snapshot until they resolve, so nothing they can see is ever reclaimed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tarn_concurrency::TransactionRegistry;
use tarn_core::Timestamp;
use tarn_storage::{IndexCatalog, VersionStore};
use tracing::debug;

/// Outcome of one reclaimer pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Horizon the pass used
    pub horizon: Timestamp,
    /// Versions dropped
    pub versions_removed: usize,
    /// Records dropped entirely
    pub records_removed: usize,
    /// Transaction records forgotten
    pub txns_forgotten: usize,
}

/// Background version reclaimer
pub struct Reclaimer {
    store: Arc<VersionStore>,
    indexes: Arc<IndexCatalog>,
    registry: Arc<TransactionRegistry>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Reclaimer {
    /// Create a reclaimer
    pub fn new(
        store: Arc<VersionStore>,
        indexes: Arc<IndexCatalog>,
        registry: Arc<TransactionRegistry>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            indexes,
            registry,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run a single pass now
    pub fn run_once(&self) -> ReclaimStats {
        reclaim_pass(&self.store, &self.indexes, &self.registry)
    }

    /// Start the background task
    ///
    /// The thread runs until `shutdown()` is called.
    pub fn start(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let indexes = Arc::clone(&self.indexes);
        let registry = Arc::clone(&self.registry);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                // Short sleeps so shutdown is noticed promptly
                let sleep_interval = Duration::from_millis(50).min(interval);
                let mut elapsed = Duration::ZERO;
                while elapsed < interval {
                    if shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                    thread::sleep(sleep_interval);
                    elapsed += sleep_interval;
                }
                reclaim_pass(&store, &indexes, &registry);
            }
        })
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check if shutdown has been signaled
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn reclaim_pass(
    store: &VersionStore,
    indexes: &IndexCatalog,
    registry: &TransactionRegistry,
) -> ReclaimStats {
    let clock = registry.clock();
    let horizon = registry.snapshots().horizon(|| clock.now());
    let report = store.reclaim(horizon);

    // Under the shard read lock so a concurrent writer's fresh entry is
    // either already in the chain or indexed after this refresh.
    for key in &report.touched {
        store.with_chain(key, |chain| {
            let versions = chain.map(|c| c.to_vec()).unwrap_or_default();
            indexes.refresh(key, &versions);
        });
    }

    let txns_forgotten = registry.forget_resolved(horizon);
    if txns_forgotten > 0 {
        debug!(target: "tarn::storage", horizon = %horizon, txns = txns_forgotten, "Forgot resolved transactions");
    }

    ReclaimStats {
        horizon,
        versions_removed: report.versions_removed,
        records_removed: report.records_removed,
        txns_forgotten,
    }
}
