//! Prepared update blocking point reads and collection scans
//!
//! A prepared transaction increments `x` on `{_id: 1}`. Readers that would
//! observe that record wait; readers of unrelated records do not.

use crate::common::*;
use std::sync::Arc;
use std::time::Duration;
use tarndb::{OpKind, ProfileLevel};

const COLL: &str = "prepare_conflict";

/// Seed two documents, index `y`, and prepare an update of `{_id: 1}`
async fn setup() -> (Arc<Database>, Session) {
    let db = open_db();
    db.create_collection(COLL).unwrap();
    seed(
        &db,
        COLL,
        vec![json!({"_id": 1, "x": 1}), json!({"_id": 2, "y": 2})],
    )
    .await;
    assert!(db.create_index(COLL, "y").unwrap());

    // Only slow operations are kept from here on
    db.profiler().set_level(ProfileLevel::Slow, 100);
    db.profiler().clear();

    let session = prepare_update(
        &db,
        COLL,
        json!({"_id": 1, "x": 1}),
        json!({"$inc": {"x": 1}}),
    )
    .await;
    assert_eq!(session.state(), Some(TxnState::Prepared));
    (db, session)
}

// ============================================================================
// Blocked reads
// ============================================================================

#[tokio::test(start_paused = true)]
async fn point_read_on_prepared_record_times_out() {
    let (db, session) = setup().await;
    let txn = session.txn_id().unwrap();

    let err = db
        .find(COLL, json!({"_id": 1}), &max_wait(1000))
        .await
        .unwrap_err();
    match err {
        Error::MaxTimeExpired {
            blocking_txn,
            waited,
        } => {
            assert_eq!(blocking_txn, txn);
            assert!(waited >= Duration::from_millis(900));
        }
        other => panic!("expected MaxTimeExpired, got {other:?}"),
    }
    assert_eq!(last_outcome(&db, json!({"_id": 1})), "MaxTimeExpired");
}

#[tokio::test(start_paused = true)]
async fn collection_scan_times_out() {
    let (db, _session) = setup().await;

    let err = db
        .find(COLL, json!({"randomField": "random"}), &max_wait(1000))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MaxTimeExpired { .. }));
}

#[tokio::test(start_paused = true)]
async fn timed_out_reads_are_profiled_with_prepare_conflicts() {
    let (db, _session) = setup().await;

    for filter in [json!({"_id": 1}), json!({"randomField": "random"})] {
        let err = db.find(COLL, filter, &max_wait(1000)).await.unwrap_err();
        assert!(matches!(err, Error::MaxTimeExpired { .. }));
    }

    let blocked = db.profiler().find(|p| {
        p.op == OpKind::Find && p.ns == COLL && p.prepare_read_conflicts > 0
    });
    assert_eq!(blocked.len(), 2);
    for profile in &blocked {
        assert!(!profile.is_ok());
        assert!(profile.duration >= Duration::from_millis(100));
        assert!(profile.attempts > 1);
    }
    let plans: Vec<_> = blocked.iter().map(|p| p.plan).collect();
    assert_eq!(plans, vec!["IDHACK", "COLLSCAN"]);
}

// ============================================================================
// Unaffected reads
// ============================================================================

#[tokio::test(start_paused = true)]
async fn unrelated_point_read_succeeds() {
    let (db, _session) = setup().await;

    let found = db
        .find(COLL, json!({"_id": 2}), &max_wait(1000))
        .await
        .unwrap();
    assert_eq!(found, vec![doc(json!({"_id": 2, "y": 2}))]);
}

#[tokio::test(start_paused = true)]
async fn unrelated_index_read_succeeds() {
    let (db, _session) = setup().await;

    let found = db
        .find(COLL, json!({"y": 2}), &max_wait(1000))
        .await
        .unwrap();
    assert_eq!(ids(&found), vec![Value::Int(2)]);
    assert_eq!(db.conflict_stats().prepare_conflicts, 0);
    assert!(db.profiler().is_empty());
}

// ============================================================================
// Resolution wakes parked readers
// ============================================================================

#[tokio::test(start_paused = true)]
async fn parked_read_returns_old_document_after_abort() {
    let (db, mut session) = setup().await;
    let txn = session.txn_id().unwrap();

    let reader = {
        let db = Arc::clone(&db);
        tokio::spawn(async move { db.find(COLL, json!({"_id": 1}), &FindOptions::new()).await })
    };
    wait_for_blocked(&db, txn, 1).await;

    session.abort().unwrap();
    let found = reader.await.unwrap().unwrap();
    assert_eq!(found, vec![doc(json!({"_id": 1, "x": 1}))]);

    let one = db
        .find_one(COLL, json!({"_id": 1}), &FindOptions::new())
        .await
        .unwrap();
    assert_eq!(one, Some(doc(json!({"_id": 1, "x": 1}))));
    assert!(db.conflict_stats().notified_wakes >= 1);
}

/// The parked read keeps its snapshot, which predates the commit
#[tokio::test(start_paused = true)]
async fn parked_read_keeps_its_snapshot_across_commit() {
    let (db, mut session) = setup().await;
    let txn = session.txn_id().unwrap();

    let reader = {
        let db = Arc::clone(&db);
        tokio::spawn(
            async move { db.find(COLL, json!({"_id": 1}), &FindOptions::new()).await },
        )
    };
    wait_for_blocked(&db, txn, 1).await;

    session.commit().unwrap();
    let found = reader.await.unwrap().unwrap();
    assert_eq!(found, vec![doc(json!({"_id": 1, "x": 1}))]);
    assert_eq!(db.blocked_operations(txn), 0);

    let fresh = db
        .find(COLL, json!({"_id": 1}), &FindOptions::new())
        .await
        .unwrap();
    assert_eq!(fresh, vec![doc(json!({"_id": 1, "x": 2}))]);
}

#[tokio::test(start_paused = true)]
async fn many_parked_readers_all_wake_on_one_resolution() {
    let (db, mut session) = setup().await;
    let txn = session.txn_id().unwrap();

    let readers: Vec<_> = (0..4)
        .map(|i| {
            let db = Arc::clone(&db);
            let filter = if i % 2 == 0 {
                json!({"_id": 1})
            } else {
                json!({"randomField": "random"})
            };
            tokio::spawn(async move { db.find(COLL, filter, &FindOptions::new()).await })
        })
        .collect();
    wait_for_blocked(&db, txn, 4).await;

    session.abort().unwrap();
    for reader in readers {
        assert!(reader.await.unwrap().is_ok());
    }
    assert_eq!(db.blocked_operations(txn), 0);
}

/// Outcome code of the most recent profiled find on `filter`
fn last_outcome(db: &Database, filter: serde_json::Value) -> &'static str {
    db.profiler()
        .find(|p| p.op == OpKind::Find && p.command == filter)
        .last()
        .map(|p| p.outcome)
        .unwrap_or("missing")
}
