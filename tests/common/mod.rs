//! Shared test utilities for all integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::sync::{Arc, Once};
use std::time::Duration;

pub use serde_json::json;
pub use tarndb::{
    Database, Document, Error, FindOptions, ProfileLevel, Session, TarnConfig, TxnId, TxnState,
    Value, WriteOptions,
};

static INIT_TRACING: Once = Once::new();

/// Route engine logs to the test harness (visible with `--nocapture`).
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// Config for tests: reclaimer off, profiler on for everything.
pub fn test_config() -> TarnConfig {
    let mut config = TarnConfig::default();
    config.reclaim.enabled = false;
    config.profiler.level = ProfileLevel::All;
    config
}

/// Open an in-memory database with [`test_config`].
pub fn open_db() -> Arc<Database> {
    init_tracing();
    Database::open_with_config(test_config()).expect("Failed to open test database")
}

/// Wait budget used by the blocking cases.
pub fn max_wait(ms: u64) -> FindOptions {
    FindOptions::new().with_max_wait(Duration::from_millis(ms))
}

/// Default write options.
pub fn w() -> WriteOptions {
    WriteOptions::default()
}

/// Build a document from JSON.
pub fn doc(value: serde_json::Value) -> Document {
    Document::from_json(value).expect("test document must be an object")
}

/// `_id`s of documents, in result order.
pub fn ids(docs: &[Document]) -> Vec<Value> {
    docs.iter().filter_map(|d| d.id().cloned()).collect()
}

/// Seed `coll` with the given documents (auto-commit).
pub async fn seed(db: &Database, coll: &str, docs: Vec<serde_json::Value>) {
    db.insert_many(coll, docs, &w()).await.expect("seed insert failed");
}

/// Start a transaction on a new session, run `update` on `filter`, and
/// prepare it. Returns the session holding the prepared transaction.
pub async fn prepare_update(
    db: &Arc<Database>,
    coll: &str,
    filter: serde_json::Value,
    update: serde_json::Value,
) -> Session {
    let mut session = db.start_session();
    session.start_transaction().expect("start_transaction failed");
    session
        .update_one(coll, filter, update, &w())
        .await
        .expect("update in transaction failed");
    session.prepare().expect("prepare failed");
    session
}

/// Poll until `txn` has `n` parked operations (or panic after 5s).
pub async fn wait_for_blocked(db: &Database, txn: TxnId, n: usize) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while db.blocked_operations(txn) < n {
        assert!(
            std::time::Instant::now() < deadline,
            "operations never parked on {}",
            txn
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
