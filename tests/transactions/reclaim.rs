//! Version reclamation
//!
//! Superseded and aborted versions are dropped once no live snapshot can
//! reach them. Prepared transactions and open read snapshots hold the
//! horizon back.

use crate::common::*;
use std::time::Duration;

const COLL: &str = "reclaim";

async fn bump(db: &Database, id: i64, times: usize) {
    for _ in 0..times {
        db.update_one(COLL, json!({"_id": id}), json!({"$inc": {"x": 1}}), &w())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn superseded_versions_dropped() {
    let db = open_db();
    seed(&db, COLL, vec![json!({"_id": 1, "x": 0})]).await;
    bump(&db, 1, 3).await;

    let stats = db.reclaim();
    assert_eq!(stats.versions_removed, 3);
    assert_eq!(stats.records_removed, 0);
    assert_eq!(db.record_count(COLL), 1);

    let found = db
        .find_one(COLL, json!({"_id": 1}), &FindOptions::new())
        .await
        .unwrap();
    assert_eq!(found, Some(doc(json!({"_id": 1, "x": 3}))));
}

#[tokio::test]
async fn deleted_records_removed() {
    let db = open_db();
    seed(
        &db,
        COLL,
        vec![json!({"_id": 1, "x": 0}), json!({"_id": 2, "x": 0})],
    )
    .await;
    db.delete_one(COLL, json!({"_id": 1}), &w()).await.unwrap();

    let stats = db.reclaim();
    assert_eq!(stats.records_removed, 1);
    assert_eq!(db.record_count(COLL), 1);
}

#[tokio::test]
async fn aborted_versions_dropped() {
    let db = open_db();
    seed(&db, COLL, vec![json!({"_id": 1, "x": 0})]).await;
    let mut session = prepare_update(&db, COLL, json!({"_id": 1}), json!({"$set": {"x": 5}})).await;
    session.abort().unwrap();

    let stats = db.reclaim();
    assert_eq!(stats.versions_removed, 1);
    assert!(stats.txns_forgotten >= 1);
    let docs = db.find(COLL, json!({"x": 0}), &FindOptions::new()).await.unwrap();
    assert_eq!(ids(&docs), vec![Value::Int(1)]);
}

#[tokio::test]
async fn prepared_transaction_holds_horizon() {
    let db = open_db();
    seed(
        &db,
        COLL,
        vec![json!({"_id": 1, "x": 0}), json!({"_id": 2, "x": 0})],
    )
    .await;
    let mut session = prepare_update(&db, COLL, json!({"_id": 2}), json!({"$set": {"x": 9}})).await;
    let txn = session.txn_id().unwrap();
    bump(&db, 1, 2).await;

    // The prepared transaction's snapshot predates both bumps
    let stats = db.reclaim();
    assert_eq!(stats.versions_removed, 0);
    assert_eq!(db.transaction_state(txn).unwrap(), TxnState::Prepared);

    session.commit().unwrap();
    let stats = db.reclaim();
    assert_eq!(stats.versions_removed, 3);
}

#[tokio::test]
async fn resolved_transactions_forgotten() {
    let db = open_db();
    let mut session = db.start_session();
    let txn = session.start_transaction().unwrap();
    session.prepare().unwrap();
    session.commit().unwrap();

    let stats = db.reclaim();
    assert!(stats.txns_forgotten >= 1);
    assert!(matches!(
        db.transaction_state(txn),
        Err(Error::TransactionNotFound(_))
    ));
    assert_eq!(session.state(), None);
}

#[tokio::test]
async fn index_entries_follow_reclaimed_versions() {
    let db = open_db();
    db.create_index(COLL, "x").unwrap();
    seed(&db, COLL, vec![json!({"_id": 1, "x": 0})]).await;
    bump(&db, 1, 2).await;
    db.reclaim();

    assert!(db.find(COLL, json!({"x": 0}), &FindOptions::new()).await.unwrap().is_empty());
    assert_eq!(
        ids(&db.find(COLL, json!({"x": 2}), &FindOptions::new()).await.unwrap()),
        vec![Value::Int(1)]
    );
}

#[tokio::test]
async fn background_reclaimer_runs() {
    init_tracing();
    let mut config = test_config();
    config.reclaim.enabled = true;
    config.reclaim.interval_ms = 10;
    let db = Database::open_with_config(config).unwrap();
    seed(&db, COLL, vec![json!({"_id": 1, "x": 0})]).await;
    db.delete_one(COLL, json!({"_id": 1}), &w()).await.unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while db.record_count(COLL) > 0 {
        assert!(std::time::Instant::now() < deadline, "reclaimer never ran");
        std::thread::sleep(Duration::from_millis(5));
    }
    db.shutdown();
}
