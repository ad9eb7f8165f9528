//! Database struct and open/close logic
//!
//! The Database wires the prepare conflict manager together:
//! - Version store and secondary indexes
//! - Transaction registry, logical clock and snapshot tracker
//! - Conflict detector and retry scheduler
//! - Operation profiler and background reclaimer
//!
//! ## Operation API
//!
//! Operations come in two flavours:
//!
//! 1. **Auto-commit** (`db.find`, `db.insert_one`, ...): reads run at a
//!    fresh snapshot; writes run in their own transaction that is prepared
//!    and committed before returning, restarting on write conflicts.
//!
//! 2. **Session** (`db.start_session()`): explicit
//!    `start_transaction` / `prepare` / `commit` / `abort` with every
//!    operation reading at the transaction's start snapshot.
//!
//! Either way an operation that runs into a prepared transaction is parked
//! until that transaction resolves or its wait budget runs out.

pub mod config;
pub(crate) mod ops;

pub use config::{
    ConflictConfig, ProfileLevel, ProfilerConfig, ReclaimConfig, TarnConfig, CONFIG_FILE_NAME,
};
pub use ops::{DeleteResult, FindOptions, UpdateResult, WriteOptions};

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tarn_concurrency::{
    ConflictDetector, ConflictMetrics, ConflictStats, LogicalClock, ResolutionNotifier,
    RetryScheduler, SnapshotTracker, TransactionMetrics, TransactionRegistry,
};
use tarn_core::{Error, Result, Timestamp, TxnId, TxnState};
use tarn_storage::{IndexCatalog, VersionStore};
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::profiler::Profiler;
use crate::reclaimer::{ReclaimStats, Reclaimer};
use crate::session::Session;

/// In-memory document database with prepared-transaction conflict handling
pub struct Database {
    config: TarnConfig,
    clock: Arc<LogicalClock>,
    snapshots: Arc<SnapshotTracker>,
    notifier: Arc<ResolutionNotifier>,
    registry: Arc<TransactionRegistry>,
    store: Arc<VersionStore>,
    indexes: Arc<IndexCatalog>,
    catalog: Catalog,
    detector: ConflictDetector,
    scheduler: RetryScheduler,
    metrics: Arc<ConflictMetrics>,
    profiler: Profiler,
    reclaimer: Reclaimer,
    reclaim_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Database {
    /// Open a database with the default configuration
    pub fn open() -> Result<Arc<Self>> {
        Self::open_with_config(TarnConfig::default())
    }

    /// Open a database configured from `tarn.toml` in `dir`
    ///
    /// A default config file is written first if none exists.
    pub fn open_dir(dir: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = dir.as_ref().join(CONFIG_FILE_NAME);
        TarnConfig::write_default_if_missing(&path)?;
        Self::open_with_config(TarnConfig::from_file(&path)?)
    }

    /// Open a database with an explicit configuration
    pub fn open_with_config(config: TarnConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let clock = Arc::new(LogicalClock::new());
        let snapshots = Arc::new(SnapshotTracker::new());
        let notifier = Arc::new(ResolutionNotifier::new());
        let registry = Arc::new(TransactionRegistry::new(
            Arc::clone(&clock),
            Arc::clone(&snapshots),
            Arc::clone(&notifier),
        ));
        let store = Arc::new(VersionStore::new());
        let indexes = Arc::new(IndexCatalog::new());
        let metrics = Arc::new(ConflictMetrics::new());

        let detector = ConflictDetector::new(Arc::clone(&store), Arc::clone(&registry));
        let scheduler = RetryScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&metrics),
            config.retry_policy(),
        );
        let reclaimer = Reclaimer::new(
            Arc::clone(&store),
            Arc::clone(&indexes),
            Arc::clone(&registry),
            config.reclaim_interval(),
        );
        let reclaim_handle = config.reclaim.enabled.then(|| reclaimer.start());

        info!(
            target: "tarn::db",
            max_wait_ms = config.conflict.default_max_wait_ms,
            profile = ?config.profiler.level,
            reclaim = config.reclaim.enabled,
            "Database opened"
        );

        Ok(Arc::new(Self {
            profiler: Profiler::new(&config.profiler),
            config,
            clock,
            snapshots,
            notifier,
            registry,
            store,
            indexes,
            catalog: Catalog::new(),
            detector,
            scheduler,
            metrics,
            reclaimer,
            reclaim_handle: Mutex::new(reclaim_handle),
        }))
    }

    /// Active configuration
    pub fn config(&self) -> &TarnConfig {
        &self.config
    }

    /// Start a session for explicit transactions
    pub fn start_session(self: &Arc<Self>) -> Session {
        Session::new(Arc::clone(self))
    }

    // ========================================================================
    // Collections and indexes
    // ========================================================================

    /// Create a collection
    pub fn create_collection(&self, name: &str) -> Result<()> {
        self.catalog.create(name)
    }

    /// Drop a collection with its records and indexes
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        self.catalog.drop(name)?;
        self.store.drop_collection(name);
        self.indexes.drop_collection(name);
        info!(target: "tarn::db", collection = name, "Collection dropped");
        Ok(())
    }

    /// Existing collection names, sorted
    pub fn list_collections(&self) -> Vec<String> {
        self.catalog.names()
    }

    /// Create a single-field secondary index
    ///
    /// The collection is created if missing. Returns false if the index
    /// already exists. Existing versions are indexed before returning.
    pub fn create_index(&self, collection: &str, field: &str) -> Result<bool> {
        if field.is_empty() {
            return Err(Error::InvalidInput("index field is empty".into()));
        }
        self.catalog.ensure(collection)?;
        let Some(index) = self.indexes.create(collection, field) else {
            return Ok(false);
        };

        let full = tarn_core::KeyRange::full(tarn_core::KeySpace::primary(collection));
        let mut entries = 0usize;
        for (id, versions) in self.store.scan(&full) {
            for version in versions.iter().filter(|v| !v.is_tombstone()) {
                index.insert(id.clone(), version.payload().get_or_null(field));
                entries += 1;
            }
        }
        debug!(target: "tarn::db", collection, field, entries, "Index created");
        Ok(true)
    }

    /// Indexed fields of a collection
    pub fn list_indexes(&self, collection: &str) -> Vec<String> {
        self.indexes
            .indexes(collection)
            .iter()
            .map(|index| index.field().to_string())
            .collect()
    }

    /// Number of records (live or not yet reclaimed) in a collection
    pub fn record_count(&self, collection: &str) -> usize {
        self.store.record_count(collection)
    }

    // ========================================================================
    // Prepared transaction resolution
    // ========================================================================

    /// Current state of a transaction
    pub fn transaction_state(&self, txn: TxnId) -> Result<TxnState> {
        self.registry.status(txn)
    }

    /// Commit a prepared transaction by id
    pub fn commit_prepared(&self, txn: TxnId) -> Result<Timestamp> {
        self.registry.commit(txn)
    }

    /// Abort a prepared transaction by id
    ///
    /// Active transactions belong to their session and are rejected here.
    pub fn abort_prepared(&self, txn: TxnId) -> Result<()> {
        match self.registry.status(txn)? {
            TxnState::Prepared => self.registry.abort(txn),
            from => Err(Error::InvalidTransition {
                txn_id: txn,
                from,
                to: "aborted",
            }),
        }
    }

    /// Number of prepared transactions awaiting resolution
    pub fn prepared_count(&self) -> usize {
        self.registry.prepared_count()
    }

    /// Number of operations currently parked on `txn`
    pub fn blocked_operations(&self, txn: TxnId) -> usize {
        self.notifier.waiting_on(txn)
    }

    // ========================================================================
    // Maintenance and observability
    // ========================================================================

    /// Run a reclamation pass now
    pub fn reclaim(&self) -> ReclaimStats {
        self.reclaimer.run_once()
    }

    /// Transaction lifecycle counters
    pub fn metrics(&self) -> TransactionMetrics {
        self.registry.metrics()
    }

    /// Prepare conflict counters
    pub fn conflict_stats(&self) -> ConflictStats {
        self.metrics.snapshot()
    }

    /// Operation profiler
    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    /// Number of live read snapshots
    pub fn active_snapshots(&self) -> usize {
        self.snapshots.active_count()
    }

    /// Stop the background reclaimer
    ///
    /// Also done on drop.
    pub fn shutdown(&self) {
        self.reclaimer.shutdown();
        if let Some(handle) = self.reclaim_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.shutdown();
    }
}
