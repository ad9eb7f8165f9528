//! TarnDB - in-memory MVCC document engine
//!
//! TarnDB keeps every record as a history of versions and runs operations
//! at snapshots. Transactions can be prepared (two-phase commit style):
//! a prepared transaction's writes are neither visible nor discarded, so
//! any operation that would observe them waits until the transaction
//! commits or aborts, or until the operation's time budget runs out.
//!
//! # Quick Start
//!
//! ```ignore
//! use serde_json::json;
//! use tarndb::{Database, FindOptions, WriteOptions};
//!
//! let db = Database::open()?;
//! db.insert_one("users", json!({"_id": 1, "name": "ada"}), &WriteOptions::default()).await?;
//!
//! let mut session = db.start_session();
//! session.start_transaction()?;
//! session.update_one("users", json!({"_id": 1}), json!({"$set": {"name": "grace"}}), &WriteOptions::default()).await?;
//! session.prepare()?;
//!
//! // Blocks until the session commits or aborts, or 1s passes
//! let opts = FindOptions::new().with_max_wait(std::time::Duration::from_secs(1));
//! let found = db.find("users", json!({"_id": 1}), &opts).await;
//! ```
//!
//! # Architecture
//!
//! - `tarn-core`: values, documents, key ranges, transaction cells, errors
//! - `tarn-storage`: version chains, version store, secondary indexes
//! - `tarn-concurrency`: registry, detector, retry scheduler, notifier
//! - `tarn-engine`: database, sessions, planner, profiler, reclaimer

pub use tarn_concurrency::{
    ConflictStats, IntentSet, OperationStats, RetryPolicy, Snapshot, TransactionMetrics,
};
pub use tarn_core::{
    Document, Error, KeyRange, KeySpace, RecordKey, Result, Timestamp, TxnId, TxnState, Value,
};
pub use tarn_engine::{
    Database, DeleteResult, FindOptions, OpKind, OperationProfile, ProfileLevel, Session,
    TarnConfig, UpdateResult, WriteOptions, CONFIG_FILE_NAME,
};
