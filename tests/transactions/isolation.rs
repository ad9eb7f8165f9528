//! Snapshot isolation between sessions
//!
//! Concurrent writers to the same record: the first to write wins, the
//! other fails with a write conflict (in a transaction) or restarts
//! (auto-commit).

use crate::common::*;

const COLL: &str = "isolation";

#[tokio::test]
async fn first_writer_wins() {
    let db = open_db();
    seed(&db, COLL, vec![json!({"_id": 1, "x": 0})]).await;

    let mut a = db.start_session();
    let mut b = db.start_session();
    a.start_transaction().unwrap();
    b.start_transaction().unwrap();

    a.update_one(COLL, json!({"_id": 1}), json!({"$inc": {"x": 1}}), &w())
        .await
        .unwrap();
    let err = b
        .update_one(COLL, json!({"_id": 1}), json!({"$inc": {"x": 5}}), &w())
        .await
        .unwrap_err();
    assert!(err.is_write_conflict());
    assert_eq!(b.state(), Some(TxnState::Aborted));

    a.prepare().unwrap();
    a.commit().unwrap();
    let found = db
        .find_one(COLL, json!({"_id": 1}), &FindOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("x"), Some(&Value::Int(1)));
    assert_eq!(db.conflict_stats().write_conflicts, 1);
}

#[tokio::test]
async fn stale_snapshot_cannot_overwrite_later_commit() {
    let db = open_db();
    seed(&db, COLL, vec![json!({"_id": 1, "x": 0})]).await;

    let mut stale = db.start_session();
    stale.start_transaction().unwrap();
    db.update_one(COLL, json!({"_id": 1}), json!({"$set": {"x": 9}}), &w())
        .await
        .unwrap();

    let err = stale
        .delete_one(COLL, json!({"_id": 1}), &w())
        .await
        .unwrap_err();
    assert!(err.is_write_conflict());
}

#[tokio::test]
async fn disjoint_writers_both_commit() {
    let db = open_db();
    seed(
        &db,
        COLL,
        vec![json!({"_id": 1, "x": 0}), json!({"_id": 2, "x": 0})],
    )
    .await;

    let mut a = db.start_session();
    let mut b = db.start_session();
    a.start_transaction().unwrap();
    b.start_transaction().unwrap();
    a.update_one(COLL, json!({"_id": 1}), json!({"$set": {"x": 1}}), &w())
        .await
        .unwrap();
    b.update_one(COLL, json!({"_id": 2}), json!({"$set": {"x": 2}}), &w())
        .await
        .unwrap();
    a.prepare().unwrap();
    b.prepare().unwrap();
    b.commit().unwrap();
    a.commit().unwrap();

    let docs = db.find(COLL, json!({}), &FindOptions::new()).await.unwrap();
    assert_eq!(
        docs,
        vec![doc(json!({"_id": 1, "x": 1})), doc(json!({"_id": 2, "x": 2}))]
    );
}

#[tokio::test]
async fn duplicate_insert_in_transaction() {
    let db = open_db();
    seed(&db, COLL, vec![json!({"_id": 1})]).await;

    let mut session = db.start_session();
    session.start_transaction().unwrap();
    let err = session
        .insert_one(COLL, json!({"_id": 1}), &w())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateKey(_)));
    assert_eq!(session.state(), Some(TxnState::Aborted));
}

#[tokio::test]
async fn failed_statement_aborts_transaction_and_discards_partial_writes() {
    let db = open_db();
    seed(
        &db,
        COLL,
        vec![json!({"_id": 1, "x": 1}), json!({"_id": 2, "x": "s"})],
    )
    .await;

    let mut session = db.start_session();
    session.start_transaction().unwrap();
    // `_id` 1 is incremented before `_id` 2 rejects the update
    let err = session
        .update_many(COLL, json!({}), json!({"$inc": {"x": 1}}), &w())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(session.state(), Some(TxnState::Aborted));
    assert!(session.prepare().is_err());

    let found = db
        .find_one(COLL, json!({"_id": 1}), &FindOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("x"), Some(&Value::Int(1)));

    // The record is free for other writers
    db.update_one(COLL, json!({"_id": 1}), json!({"$inc": {"x": 1}}), &w())
        .await
        .unwrap();
    let found = db
        .find_one(COLL, json!({"_id": 1}), &FindOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("x"), Some(&Value::Int(2)));
}

#[tokio::test]
async fn update_many_counts_matched_and_modified() {
    let db = open_db();
    seed(
        &db,
        COLL,
        vec![
            json!({"_id": 1, "k": "a", "x": 1}),
            json!({"_id": 2, "k": "a", "x": 2}),
            json!({"_id": 3, "k": "b", "x": 2}),
        ],
    )
    .await;

    let result = db
        .update_many(COLL, json!({"k": "a"}), json!({"$set": {"x": 2}}), &w())
        .await
        .unwrap();
    assert_eq!((result.matched, result.modified), (2, 1));

    let deleted = db
        .delete_many(COLL, json!({"x": 2}), &w())
        .await
        .unwrap();
    assert_eq!(deleted.deleted, 3);
    assert!(db
        .find(COLL, json!({}), &FindOptions::new())
        .await
        .unwrap()
        .is_empty());
}
