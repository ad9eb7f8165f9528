//! Writers blocked on prepared transactions
//!
//! A writer that would overwrite a prepared version waits like a reader.
//! Once the prepared transaction commits, the writer's snapshot is stale:
//! auto-commit writes restart at a fresh snapshot, transactional writes
//! fail with a write conflict.

use crate::common::*;
use std::sync::Arc;

const COLL: &str = "writers";

async fn setup() -> (Arc<Database>, Session) {
    let db = open_db();
    seed(&db, COLL, vec![json!({"_id": 1, "x": 1})]).await;
    let session = prepare_update(&db, COLL, json!({"_id": 1}), json!({"$inc": {"x": 1}})).await;
    (db, session)
}

fn spawn_inc(db: &Arc<Database>, by: i64) -> tokio::task::JoinHandle<tarndb::Result<tarndb::UpdateResult>> {
    let db = Arc::clone(db);
    tokio::spawn(async move {
        db.update_one(COLL, json!({"_id": 1}), json!({"$inc": {"x": by}}), &w())
            .await
    })
}

async fn x_of(db: &Database, id: i64) -> Option<Value> {
    db.find_one(COLL, json!({"_id": id}), &FindOptions::new())
        .await
        .unwrap()
        .and_then(|d| d.get("x").cloned())
}

// ============================================================================
// Auto-commit writers
// ============================================================================

#[tokio::test(start_paused = true)]
async fn blocked_update_applies_after_abort() {
    let (db, mut session) = setup().await;
    let txn = session.txn_id().unwrap();

    let writer = spawn_inc(&db, 10);
    wait_for_blocked(&db, txn, 1).await;
    session.abort().unwrap();

    let result = writer.await.unwrap().unwrap();
    assert_eq!((result.matched, result.modified), (1, 1));
    assert_eq!(x_of(&db, 1).await, Some(Value::Int(11)));
    assert_eq!(db.conflict_stats().write_conflicts, 0);
}

#[tokio::test(start_paused = true)]
async fn blocked_update_restarts_after_commit() {
    let (db, mut session) = setup().await;
    let txn = session.txn_id().unwrap();

    let writer = spawn_inc(&db, 10);
    wait_for_blocked(&db, txn, 1).await;
    session.commit().unwrap();

    let result = writer.await.unwrap().unwrap();
    assert_eq!((result.matched, result.modified), (1, 1));
    assert_eq!(x_of(&db, 1).await, Some(Value::Int(12)));
    assert_eq!(db.conflict_stats().write_conflicts, 1);
}

#[tokio::test(start_paused = true)]
async fn blocked_insert_of_prepared_id() {
    let db = open_db();
    let mut session = db.start_session();
    session.start_transaction().unwrap();
    session
        .insert_one(COLL, json!({"_id": 9, "x": 0}), &w())
        .await
        .unwrap();
    session.prepare().unwrap();
    let txn = session.txn_id().unwrap();

    let insert = |x: i64| {
        let db = Arc::clone(&db);
        tokio::spawn(async move { db.insert_one(COLL, json!({"_id": 9, "x": x}), &w()).await })
    };

    // Duplicate once the prepared insert commits
    let writer = insert(1);
    wait_for_blocked(&db, txn, 1).await;
    session.commit().unwrap();
    let err = writer.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::DuplicateKey(_)));
    assert_eq!(x_of(&db, 9).await, Some(Value::Int(0)));
}

#[tokio::test(start_paused = true)]
async fn blocked_insert_succeeds_after_abort() {
    let db = open_db();
    let mut session = db.start_session();
    session.start_transaction().unwrap();
    session
        .insert_one(COLL, json!({"_id": 9, "x": 0}), &w())
        .await
        .unwrap();
    session.prepare().unwrap();
    let txn = session.txn_id().unwrap();

    let writer = {
        let db = Arc::clone(&db);
        tokio::spawn(async move { db.insert_one(COLL, json!({"_id": 9, "x": 1}), &w()).await })
    };
    wait_for_blocked(&db, txn, 1).await;
    session.abort().unwrap();

    assert_eq!(writer.await.unwrap().unwrap(), Value::Int(9));
    assert_eq!(x_of(&db, 9).await, Some(Value::Int(1)));
}

// ============================================================================
// Transactional writers
// ============================================================================

#[tokio::test(start_paused = true)]
async fn transactional_writer_conflicts_after_commit() {
    let (db, mut prepared) = setup().await;
    let txn = prepared.txn_id().unwrap();

    let writer = {
        let db = Arc::clone(&db);
        tokio::spawn(async move {
            let mut session = db.start_session();
            session.start_transaction().unwrap();
            let result = session
                .update_one(COLL, json!({"_id": 1}), json!({"$set": {"x": 100}}), &w())
                .await;
            (result, session.state())
        })
    };
    wait_for_blocked(&db, txn, 1).await;
    prepared.commit().unwrap();

    let (result, state) = writer.await.unwrap();
    assert!(result.unwrap_err().is_write_conflict());
    assert_eq!(state, Some(TxnState::Aborted));
    assert_eq!(x_of(&db, 1).await, Some(Value::Int(2)));
}

#[tokio::test(start_paused = true)]
async fn transactional_writer_proceeds_after_abort() {
    let (db, mut prepared) = setup().await;
    let txn = prepared.txn_id().unwrap();

    let writer = {
        let db = Arc::clone(&db);
        tokio::spawn(async move {
            let mut session = db.start_session();
            session.start_transaction().unwrap();
            session
                .update_one(COLL, json!({"_id": 1}), json!({"$set": {"x": 100}}), &w())
                .await?;
            session.prepare()?;
            session.commit()
        })
    };
    wait_for_blocked(&db, txn, 1).await;
    prepared.abort().unwrap();

    writer.await.unwrap().unwrap();
    assert_eq!(x_of(&db, 1).await, Some(Value::Int(100)));
}
