//! Range reads against prepared inserts and deletes
//!
//! A prepared transaction blocks every read whose key range overlaps a key
//! it wrote, including keys that did not exist before it.

use crate::common::*;
use std::sync::Arc;

const COLL: &str = "phantoms";

async fn setup() -> Arc<Database> {
    let db = open_db();
    seed(
        &db,
        COLL,
        vec![json!({"_id": 1, "x": 1}), json!({"_id": 2, "y": 2})],
    )
    .await;
    db.create_index(COLL, "y").unwrap();
    db
}

/// Prepare a transaction that inserts `doc`
async fn prepare_insert(db: &Arc<Database>, doc: serde_json::Value) -> Session {
    let mut session = db.start_session();
    session.start_transaction().unwrap();
    session.insert_one(COLL, doc, &w()).await.unwrap();
    session.prepare().unwrap();
    session
}

// ============================================================================
// Prepared inserts
// ============================================================================

#[tokio::test(start_paused = true)]
async fn id_range_covering_prepared_insert_blocks() {
    let db = setup().await;
    let _session = prepare_insert(&db, json!({"_id": 5, "y": 150})).await;

    let err = db
        .find(COLL, json!({"_id": {"$gte": 3}}), &max_wait(200))
        .await
        .unwrap_err();
    assert!(err.is_max_time_expired());

    let err = db
        .find(COLL, json!({"_id": {"$lte": 5}}), &max_wait(200))
        .await
        .unwrap_err();
    assert!(err.is_max_time_expired());
}

#[tokio::test(start_paused = true)]
async fn id_range_excluding_prepared_insert_succeeds() {
    let db = setup().await;
    let _session = prepare_insert(&db, json!({"_id": 5, "y": 150})).await;

    let found = db
        .find(COLL, json!({"_id": {"$lt": 5}}), &max_wait(200))
        .await
        .unwrap();
    assert_eq!(ids(&found), vec![Value::Int(1), Value::Int(2)]);

    let found = db
        .find(COLL, json!({"_id": {"$gt": 5}}), &max_wait(200))
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test(start_paused = true)]
async fn index_range_covering_prepared_insert_blocks() {
    let db = setup().await;
    let _session = prepare_insert(&db, json!({"_id": 5, "y": 150})).await;

    let err = db
        .find(COLL, json!({"y": {"$gt": 100}}), &max_wait(200))
        .await
        .unwrap_err();
    assert!(err.is_max_time_expired());

    let found = db
        .find(COLL, json!({"y": {"$lt": 100}}), &max_wait(200))
        .await
        .unwrap();
    assert_eq!(ids(&found), vec![Value::Int(2)]);
}

#[tokio::test(start_paused = true)]
async fn committed_insert_appears_only_to_later_reads() {
    let db = setup().await;
    let mut session = prepare_insert(&db, json!({"_id": 5, "y": 150})).await;
    let txn = session.txn_id().unwrap();

    let reader = {
        let db = Arc::clone(&db);
        tokio::spawn(async move {
            db.find(COLL, json!({"_id": {"$gte": 3}}), &FindOptions::new())
                .await
        })
    };
    wait_for_blocked(&db, txn, 1).await;

    session.commit().unwrap();
    assert!(reader.await.unwrap().unwrap().is_empty());

    let found = db
        .find(COLL, json!({"_id": {"$gte": 3}}), &FindOptions::new())
        .await
        .unwrap();
    assert_eq!(found, vec![doc(json!({"_id": 5, "y": 150}))]);
}

#[tokio::test(start_paused = true)]
async fn aborted_insert_never_appears() {
    let db = setup().await;
    let mut session = prepare_insert(&db, json!({"_id": 5, "y": 150})).await;
    let txn = session.txn_id().unwrap();

    let reader = {
        let db = Arc::clone(&db);
        tokio::spawn(async move {
            db.find(COLL, json!({"y": {"$gt": 100}}), &FindOptions::new())
                .await
        })
    };
    wait_for_blocked(&db, txn, 1).await;

    session.abort().unwrap();
    assert!(reader.await.unwrap().unwrap().is_empty());
}

// ============================================================================
// Prepared deletes
// ============================================================================

#[tokio::test(start_paused = true)]
async fn prepared_delete_blocks_reads_of_deleted_record() {
    let db = setup().await;
    let mut session = db.start_session();
    session.start_transaction().unwrap();
    let deleted = session
        .delete_one(COLL, json!({"_id": 2}), &w())
        .await
        .unwrap();
    assert_eq!(deleted.deleted, 1);
    session.prepare().unwrap();
    let txn = session.txn_id().unwrap();

    let err = db
        .find(COLL, json!({"y": 2}), &max_wait(200))
        .await
        .unwrap_err();
    assert!(err.is_max_time_expired());

    let reader = {
        let db = Arc::clone(&db);
        tokio::spawn(async move { db.find(COLL, json!({"y": 2}), &FindOptions::new()).await })
    };
    wait_for_blocked(&db, txn, 1).await;

    session.commit().unwrap();
    // The parked read's snapshot predates the delete
    assert_eq!(ids(&reader.await.unwrap().unwrap()), vec![Value::Int(2)]);
    assert_eq!(
        db.find(COLL, json!({}), &FindOptions::new())
            .await
            .map(|docs| ids(&docs))
            .unwrap(),
        vec![Value::Int(1)]
    );
}

// ============================================================================
// Prepared updates of an indexed field
// ============================================================================

#[tokio::test(start_paused = true)]
async fn index_read_of_value_moved_away_blocks() {
    let db = setup().await;
    let _session = prepare_update(&db, COLL, json!({"_id": 2}), json!({"$set": {"y": 3}})).await;

    let err = db
        .find(COLL, json!({"y": 2}), &max_wait(200))
        .await
        .unwrap_err();
    assert!(err.is_max_time_expired());
}

#[tokio::test(start_paused = true)]
async fn index_read_of_value_moved_to_blocks() {
    let db = setup().await;
    let _session = prepare_update(&db, COLL, json!({"_id": 2}), json!({"$set": {"y": 3}})).await;

    let err = db
        .find(COLL, json!({"y": 3}), &max_wait(200))
        .await
        .unwrap_err();
    assert!(err.is_max_time_expired());

    let found = db
        .find(COLL, json!({"y": 4}), &max_wait(200))
        .await
        .unwrap();
    assert!(found.is_empty());
}
