//! Transaction Lifecycle Tests
//!
//! active -> prepared -> {committed, aborted}, or active -> aborted.
//! Resolved states are terminal.

use crate::common::*;

const COLL: &str = "lifecycle";

// ============================================================================
// Valid transitions
// ============================================================================

#[tokio::test]
async fn prepare_then_commit() {
    let db = open_db();
    let mut session = db.start_session();
    let txn = session.start_transaction().unwrap();
    assert_eq!(db.transaction_state(txn).unwrap(), TxnState::Active);

    session
        .insert_one(COLL, json!({"_id": 1}), &w())
        .await
        .unwrap();
    let prepare_ts = session.prepare().unwrap();
    assert_eq!(db.transaction_state(txn).unwrap(), TxnState::Prepared);
    assert_eq!(db.prepared_count(), 1);

    let commit_ts = session.commit().unwrap();
    assert!(commit_ts > prepare_ts);
    assert_eq!(
        db.transaction_state(txn).unwrap(),
        TxnState::Committed(commit_ts)
    );
    assert_eq!(db.prepared_count(), 0);
}

#[tokio::test]
async fn prepare_then_abort() {
    let db = open_db();
    let mut session = db.start_session();
    let txn = session.start_transaction().unwrap();
    session
        .insert_one(COLL, json!({"_id": 1}), &w())
        .await
        .unwrap();
    session.prepare().unwrap();
    session.abort().unwrap();

    assert_eq!(db.transaction_state(txn).unwrap(), TxnState::Aborted);
    assert!(db
        .find(COLL, json!({}), &FindOptions::new())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn abort_while_active() {
    let db = open_db();
    let mut session = db.start_session();
    let txn = session.start_transaction().unwrap();
    session.abort().unwrap();
    assert_eq!(db.transaction_state(txn).unwrap(), TxnState::Aborted);

    // A new transaction may start once the last one resolved
    let next = session.start_transaction().unwrap();
    assert_ne!(next, txn);
}

// ============================================================================
// Invalid transitions
// ============================================================================

#[tokio::test]
async fn commit_without_prepare_rejected() {
    let db = open_db();
    let mut session = db.start_session();
    let txn = session.start_transaction().unwrap();

    let err = session.commit().unwrap_err();
    assert_eq!(
        err,
        Error::InvalidTransition {
            txn_id: txn,
            from: TxnState::Active,
            to: "committed",
        }
    );
    assert_eq!(db.transaction_state(txn).unwrap(), TxnState::Active);
}

#[tokio::test]
async fn prepare_twice_rejected() {
    let db = open_db();
    let mut session = db.start_session();
    session.start_transaction().unwrap();
    session.prepare().unwrap();
    assert!(matches!(
        session.prepare(),
        Err(Error::InvalidTransition { to: "prepared", .. })
    ));
}

#[tokio::test]
async fn resolved_states_are_terminal() {
    let db = open_db();
    let mut session = db.start_session();
    let txn = session.start_transaction().unwrap();
    session.prepare().unwrap();
    let ts = session.commit().unwrap();

    assert!(session.commit().is_err());
    assert!(session.abort().is_err());
    assert!(session.prepare().is_err());
    assert!(db.abort_prepared(txn).is_err());
    assert_eq!(db.transaction_state(txn).unwrap(), TxnState::Committed(ts));
}

#[tokio::test]
async fn unknown_transaction() {
    let db = open_db();
    let bogus = TxnId::new(u64::MAX);
    assert!(matches!(
        db.transaction_state(bogus),
        Err(Error::TransactionNotFound(_))
    ));
    assert!(matches!(
        db.commit_prepared(bogus),
        Err(Error::TransactionNotFound(_))
    ));
}

// ============================================================================
// Resolution by id
// ============================================================================

#[tokio::test]
async fn prepared_transaction_outlives_session() {
    let db = open_db();
    let txn = {
        let mut session = db.start_session();
        let txn = session.start_transaction().unwrap();
        session
            .insert_one(COLL, json!({"_id": 1, "v": "kept"}), &w())
            .await
            .unwrap();
        session.prepare().unwrap();
        txn
    };
    assert_eq!(db.transaction_state(txn).unwrap(), TxnState::Prepared);

    db.commit_prepared(txn).unwrap();
    let found = db
        .find_one(COLL, json!({"_id": 1}), &FindOptions::new())
        .await
        .unwrap();
    assert_eq!(found, Some(doc(json!({"_id": 1, "v": "kept"}))));
}

#[tokio::test]
async fn abort_prepared_by_id() {
    let db = open_db();
    let mut session = db.start_session();
    let txn = session.start_transaction().unwrap();
    assert!(matches!(
        db.abort_prepared(txn),
        Err(Error::InvalidTransition { from: TxnState::Active, .. })
    ));

    session.prepare().unwrap();
    db.abort_prepared(txn).unwrap();
    assert_eq!(session.state(), Some(TxnState::Aborted));
    assert!(!session.in_transaction());
}

// ============================================================================
// Metrics
// ============================================================================

#[tokio::test]
async fn metrics_track_outcomes() {
    let db = open_db();
    db.insert_one(COLL, json!({"_id": 1}), &w()).await.unwrap();

    let mut committed = db.start_session();
    committed.start_transaction().unwrap();
    committed.prepare().unwrap();
    committed.commit().unwrap();

    let mut aborted = db.start_session();
    aborted.start_transaction().unwrap();
    aborted.abort().unwrap();

    let m = db.metrics();
    assert_eq!(m.total_started, 3);
    assert_eq!(m.total_prepared, 2);
    assert_eq!(m.total_committed, 2);
    assert_eq!(m.total_aborted, 1);
    assert_eq!(m.active_count, 0);
}
