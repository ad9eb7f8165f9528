//! Client sessions with explicit transactions
//!
//! A session runs at most one transaction at a time. Outside a transaction
//! its operations behave exactly like the database's auto-commit ones.
//!
//! ```text
//! start_transaction ──► ops ──► prepare ──► commit
//!                        │         │
//!                        └─────────┴──────► abort
//! ```
//!
//! Once prepared the transaction can no longer run operations; its writes
//! block every conflicting reader and writer until it commits or aborts.
//! A prepared transaction survives its session: dropping the session leaves
//! it for [`Database::commit_prepared`] / [`Database::abort_prepared`].

use std::sync::Arc;

use tarn_concurrency::IntentSet;
use tarn_core::{Document, Error, Result, Timestamp, TxnId, TxnState, Value};
use tracing::{debug, warn};

use crate::database::ops::{WriteOp, WriteProgress};
use crate::database::{Database, DeleteResult, FindOptions, UpdateResult, WriteOptions};
use crate::profiler::OpKind;

/// A client session
pub struct Session {
    db: Arc<Database>,
    txn: Option<TxnId>,
    intents: IntentSet,
}

impl Session {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            txn: None,
            intents: IntentSet::new(),
        }
    }

    /// Database this session runs against
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Current (or last) transaction
    pub fn txn_id(&self) -> Option<TxnId> {
        self.txn
    }

    /// State of the current transaction
    pub fn state(&self) -> Option<TxnState> {
        self.txn.and_then(|txn| self.db.registry().status(txn).ok())
    }

    /// Check if a transaction is running (active or prepared)
    pub fn in_transaction(&self) -> bool {
        matches!(self.state(), Some(TxnState::Active | TxnState::Prepared))
    }

    /// Start a transaction
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if the previous transaction has not resolved.
    pub fn start_transaction(&mut self) -> Result<TxnId> {
        if let (Some(txn), Some(state)) = (self.txn, self.state()) {
            if !state.is_resolved() {
                return Err(Error::InvalidTransition {
                    txn_id: txn,
                    from: state,
                    to: "active",
                });
            }
        }
        let txn = self.db.registry().begin();
        self.txn = Some(txn);
        self.intents = IntentSet::new();
        Ok(txn)
    }

    /// Prepare the current transaction, freezing its write intents
    pub fn prepare(&mut self) -> Result<Timestamp> {
        let txn = self.current()?;
        let intents = std::mem::take(&mut self.intents);
        match self.db.registry().prepare(txn, intents.clone()) {
            Ok(ts) => Ok(ts),
            Err(e) => {
                self.intents = intents;
                Err(e)
            }
        }
    }

    /// Commit the current (prepared) transaction
    pub fn commit(&mut self) -> Result<Timestamp> {
        let txn = self.current()?;
        self.db.registry().commit(txn)
    }

    /// Abort the current transaction
    pub fn abort(&mut self) -> Result<()> {
        let txn = self.current()?;
        self.intents = IntentSet::new();
        self.db.registry().abort(txn)
    }

    fn current(&self) -> Result<TxnId> {
        self.txn
            .ok_or_else(|| Error::InvalidInput("no transaction started in this session".into()))
    }

    /// Transaction operations run in, if one is active or prepared
    ///
    /// Once resolved, operations fall back to auto-commit.
    fn live_txn(&self) -> Option<TxnId> {
        self.txn.filter(|_| self.in_transaction())
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Find documents at the transaction's snapshot (own writes included)
    pub async fn find(
        &self,
        collection: &str,
        filter: serde_json::Value,
        opts: &FindOptions,
    ) -> Result<Vec<Document>> {
        self.db.find_in(collection, filter, opts, self.live_txn()).await
    }

    /// Find the first matching document
    pub async fn find_one(
        &self,
        collection: &str,
        filter: serde_json::Value,
        opts: &FindOptions,
    ) -> Result<Option<Document>> {
        let opts = opts.clone().with_limit(1);
        Ok(self.find(collection, filter, &opts).await?.into_iter().next())
    }

    /// Insert one document, returning its `_id`
    pub async fn insert_one(
        &mut self,
        collection: &str,
        doc: serde_json::Value,
        opts: &WriteOptions,
    ) -> Result<Value> {
        let command = doc.clone();
        let op = WriteOp::insert(vec![doc]);
        let mut progress = self.write(collection, OpKind::Insert, command, op, opts).await?;
        progress
            .inserted
            .pop()
            .ok_or_else(|| Error::InvalidInput("insert produced no document".into()))
    }

    /// Update the first document matching `filter`
    pub async fn update_one(
        &mut self,
        collection: &str,
        filter: serde_json::Value,
        update: serde_json::Value,
        opts: &WriteOptions,
    ) -> Result<UpdateResult> {
        let op = WriteOp::update(filter.clone(), update, false);
        let progress = self.write(collection, OpKind::Update, filter, op, opts).await?;
        Ok(progress.update_result())
    }

    /// Update every document matching `filter`
    pub async fn update_many(
        &mut self,
        collection: &str,
        filter: serde_json::Value,
        update: serde_json::Value,
        opts: &WriteOptions,
    ) -> Result<UpdateResult> {
        let op = WriteOp::update(filter.clone(), update, true);
        let progress = self.write(collection, OpKind::Update, filter, op, opts).await?;
        Ok(progress.update_result())
    }

    /// Delete the first document matching `filter`
    pub async fn delete_one(
        &mut self,
        collection: &str,
        filter: serde_json::Value,
        opts: &WriteOptions,
    ) -> Result<DeleteResult> {
        let op = WriteOp::delete(filter.clone(), false);
        let progress = self.write(collection, OpKind::Delete, filter, op, opts).await?;
        Ok(progress.delete_result())
    }

    /// Delete every document matching `filter`
    pub async fn delete_many(
        &mut self,
        collection: &str,
        filter: serde_json::Value,
        opts: &WriteOptions,
    ) -> Result<DeleteResult> {
        let op = WriteOp::delete(filter.clone(), true);
        let progress = self.write(collection, OpKind::Delete, filter, op, opts).await?;
        Ok(progress.delete_result())
    }

    async fn write(
        &mut self,
        collection: &str,
        kind: OpKind,
        command: serde_json::Value,
        op: Result<WriteOp>,
        opts: &WriteOptions,
    ) -> Result<WriteProgress> {
        let txn = self.live_txn().map(|txn| (txn, &mut self.intents));
        self.db
            .write_in(collection, kind, command, op, opts, txn)
            .await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(txn) = self.txn else {
            return;
        };
        match self.state() {
            Some(TxnState::Active) => {
                if let Err(e) = self.db.registry().abort(txn) {
                    debug!(target: "tarn::txn", txn_id = %txn, error = %e, "Abort on session drop did not apply");
                }
            }
            Some(TxnState::Prepared) => {
                warn!(
                    target: "tarn::txn",
                    txn_id = %txn,
                    "Session dropped with a prepared transaction; it stays prepared until resolved by id"
                );
            }
            _ => {}
        }
    }
}
