//! Wait budgets
//!
//! Tests for how long a blocked operation waits and what a timeout leaves
//! behind (nothing).

use crate::common::*;
use std::sync::Arc;
use std::time::Duration;

const COLL: &str = "timeouts";

async fn setup(config: TarnConfig) -> (Arc<Database>, Session) {
    init_tracing();
    let db = Database::open_with_config(config).unwrap();
    seed(
        &db,
        COLL,
        vec![json!({"_id": 1, "x": 1}), json!({"_id": 2, "x": 2})],
    )
    .await;
    let session = prepare_update(&db, COLL, json!({"_id": 1}), json!({"$inc": {"x": 1}})).await;
    (db, session)
}

fn with_default_wait(ms: u64) -> TarnConfig {
    let mut config = test_config();
    config.conflict.default_max_wait_ms = ms;
    config
}

// ============================================================================
// Budget selection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn configured_default_applies_without_request_budget() {
    let (db, _session) = setup(with_default_wait(300)).await;

    let started = tokio::time::Instant::now();
    let err = db
        .find(COLL, json!({"_id": 1}), &FindOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_max_time_expired());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn request_budget_overrides_default() {
    let (db, session) = setup(with_default_wait(100)).await;
    let txn = session.txn_id().unwrap();

    let resolver = {
        let db = Arc::clone(&db);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            db.abort_prepared(txn).unwrap();
        })
    };

    let found = db
        .find(COLL, json!({"_id": 1}), &max_wait(2000))
        .await
        .unwrap();
    assert_eq!(found, vec![doc(json!({"_id": 1, "x": 1}))]);
    resolver.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn zero_budget_fails_on_first_conflict() {
    let (db, session) = setup(test_config()).await;

    let err = db
        .find(COLL, json!({"_id": 1}), &max_wait(0))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::MaxTimeExpired {
            blocking_txn: session.txn_id().unwrap(),
            waited: Duration::ZERO,
        }
    );
    assert_eq!(db.conflict_stats().timeouts, 1);
    assert_eq!(db.conflict_stats().waits, 0);
}

#[tokio::test(start_paused = true)]
async fn parked_operation_polls_while_waiting() {
    let (db, _session) = setup(test_config()).await;

    db.find(COLL, json!({"_id": 1}), &max_wait(500))
        .await
        .unwrap_err();
    let stats = db.conflict_stats();
    assert!(stats.tick_wakes > 0);
    assert_eq!(stats.notified_wakes, 0);
    assert_eq!(stats.prepare_conflicts, stats.tick_wakes + 1);
}

#[tokio::test(start_paused = true)]
async fn auto_commit_restarts_share_one_budget() {
    let (db, session) = setup(test_config()).await;
    let first = session.txn_id().unwrap();

    // Commit the first holder late in the budget, then prepare a second one
    // on the same record before the writer gets to restart
    let successor = {
        let db = Arc::clone(&db);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(900)).await;
            db.commit_prepared(first).unwrap();
            prepare_update(&db, COLL, json!({"_id": 1}), json!({"$inc": {"x": 10}})).await
        })
    };

    let started = tokio::time::Instant::now();
    let err = db
        .update_one(
            COLL,
            json!({"_id": 1}),
            json!({"$set": {"x": 0}}),
            &w().with_max_wait(Duration::from_millis(1000)),
        )
        .await
        .unwrap_err();
    let elapsed = started.elapsed();
    let second = successor.await.unwrap();

    assert!(err.is_max_time_expired(), "unexpected {err:?}");
    assert!(elapsed >= Duration::from_millis(1000));
    assert!(elapsed < Duration::from_millis(1100), "waited {elapsed:?}");
    assert_ne!(second.txn_id(), Some(first));
}

// ============================================================================
// No side effects
// ============================================================================

#[tokio::test(start_paused = true)]
async fn timed_out_write_leaves_nothing_behind() {
    let (db, mut session) = setup(test_config()).await;

    let err = db
        .update_many(
            COLL,
            json!({}),
            json!({"$set": {"z": 1}}),
            &WriteOptions::new().with_max_wait(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();
    assert!(err.is_max_time_expired());

    session.abort().unwrap();
    let docs = db.find(COLL, json!({}), &FindOptions::new()).await.unwrap();
    assert_eq!(
        docs,
        vec![
            doc(json!({"_id": 1, "x": 1})),
            doc(json!({"_id": 2, "x": 2})),
        ]
    );
    assert_eq!(db.prepared_count(), 0);
    assert_eq!(db.metrics().active_count, 0);
}

#[tokio::test(start_paused = true)]
async fn timed_out_operation_is_profiled_as_failed() {
    let (db, _session) = setup(test_config()).await;
    db.profiler().clear();

    db.find(COLL, json!({"_id": 1}), &max_wait(150))
        .await
        .unwrap_err();
    let entries = db.profiler().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, "MaxTimeExpired");
    assert_eq!(entries[0].n, 0);
    assert!(entries[0].waited >= Duration::from_millis(100));
}
