//! Query and write operations
//!
//! Every operation is a sequence of non-blocking attempts driven by the
//! retry scheduler. An attempt either completes or reports the prepared
//! transaction in its way; the scheduler parks the operation and runs the
//! attempt again once that transaction resolves.
//!
//! Writes remember which records they already handled, so an attempt that
//! runs again after a wait never applies the same change twice.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tarn_concurrency::{
    resolve_versions, Attempt, IntentSet, OperationStats, RangeResolution, Resolution, Snapshot,
    TransactionRegistry, TxnRecord, WriteResolution,
};
use tarn_core::{
    Document, Error, KeyRange, KeySpace, RecordKey, Result, TxnCell, TxnId, TxnState, Value,
    ID_FIELD,
};
use tarn_storage::RecordVersion;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::Database;
use crate::profiler::{OpKind, OperationProfile};
use crate::query::{self, Filter, Plan};
use crate::update::UpdateSpec;

/// Options for queries
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Wait budget on prepared transactions (database default if unset)
    pub max_wait: Option<Duration>,
    /// Maximum number of documents returned
    pub limit: Option<usize>,
}

impl FindOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the wait budget
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Set the result limit
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Options for writes
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Wait budget on prepared transactions (database default if unset)
    pub max_wait: Option<Duration>,
}

impl WriteOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the wait budget
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }
}

/// Outcome of an update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    /// Documents matching the filter
    pub matched: u64,
    /// Documents actually changed
    pub modified: u64,
}

/// Outcome of a delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteResult {
    /// Documents deleted
    pub deleted: u64,
}

/// Transaction a write runs in
pub(crate) struct TxnContext<'a> {
    snapshot: Snapshot,
    cell: Arc<TxnCell>,
    intents: &'a mut IntentSet,
}

/// Parsed write request
pub(crate) enum WriteOp {
    Insert(Vec<Document>),
    Update {
        filter: Filter,
        update: UpdateSpec,
        multi: bool,
    },
    Delete {
        filter: Filter,
        multi: bool,
    },
}

impl WriteOp {
    /// Parse documents to insert, assigning missing `_id`s
    pub(crate) fn insert(docs: Vec<serde_json::Value>) -> Result<Self> {
        let docs = docs
            .into_iter()
            .map(|json| {
                let mut doc = Document::from_json(json)?;
                if doc.id().is_none() {
                    doc.set(ID_FIELD, Value::String(Uuid::new_v4().to_string()))?;
                }
                Ok(doc)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(WriteOp::Insert(docs))
    }

    pub(crate) fn update(
        filter: serde_json::Value,
        update: serde_json::Value,
        multi: bool,
    ) -> Result<Self> {
        Ok(WriteOp::Update {
            filter: Filter::from_json(filter)?,
            update: UpdateSpec::from_json(update)?,
            multi,
        })
    }

    pub(crate) fn delete(filter: serde_json::Value, multi: bool) -> Result<Self> {
        Ok(WriteOp::Delete {
            filter: Filter::from_json(filter)?,
            multi,
        })
    }

    fn filter(&self) -> Option<&Filter> {
        match self {
            WriteOp::Insert(_) => None,
            WriteOp::Update { filter, .. } | WriteOp::Delete { filter, .. } => Some(filter),
        }
    }
}

/// What a write has done so far, kept across attempts
#[derive(Debug, Default)]
pub(crate) struct WriteProgress {
    pub(crate) inserted: Vec<Value>,
    pub(crate) matched: BTreeSet<Value>,
    pub(crate) modified: u64,
    pub(crate) deleted: u64,
}

impl WriteProgress {
    fn affected(&self) -> u64 {
        self.inserted.len() as u64 + self.modified + self.deleted
    }

    pub(crate) fn update_result(&self) -> UpdateResult {
        UpdateResult {
            matched: self.matched.len() as u64,
            modified: self.modified,
        }
    }

    pub(crate) fn delete_result(&self) -> DeleteResult {
        DeleteResult {
            deleted: self.deleted,
        }
    }
}

/// Keep a visible match; returns the blocking transaction on conflict
fn collect_match(resolution: Resolution, filter: &Filter, docs: &mut Vec<Document>) -> Option<TxnId> {
    match resolution {
        Resolution::Visible(version) if filter.matches(version.payload()) => {
            docs.push(version.payload().clone());
            None
        }
        Resolution::Visible(_) | Resolution::Invisible => None,
        Resolution::PrepareConflict(txn) => Some(txn),
    }
}

fn outcome<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    }
}

// ============================================================================
// Public operations (auto-commit)
// ============================================================================

impl Database {
    /// Find documents matching `filter` at a fresh snapshot
    ///
    /// # Errors
    ///
    /// `MaxTimeExpired` if a prepared transaction still blocks the query
    /// when the wait budget runs out.
    pub async fn find(
        &self,
        collection: &str,
        filter: serde_json::Value,
        opts: &FindOptions,
    ) -> Result<Vec<Document>> {
        self.find_in(collection, filter, opts, None).await
    }

    /// Find the first document matching `filter`
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
        &self,
        collection: &str,
        doc: serde_json::Value,
        opts: &WriteOptions,
    ) -> Result<Value> {
        let mut ids = self.insert_many(collection, vec![doc], opts).await?;
        ids.pop()
            .ok_or_else(|| Error::InvalidInput("insert produced no document".into()))
    }

    /// Insert documents in one transaction, returning their `_id`s
    pub async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<serde_json::Value>,
        opts: &WriteOptions,
    ) -> Result<Vec<Value>> {
        let command = serde_json::Value::Array(docs.clone());
        let op = WriteOp::insert(docs);
        let progress = self
            .write_in(collection, OpKind::Insert, command, op, opts, None)
            .await?;
        Ok(progress.inserted)
    }

    /// Update the first document matching `filter`
    pub async fn update_one(
        &self,
        collection: &str,
        filter: serde_json::Value,
        update: serde_json::Value,
        opts: &WriteOptions,
    ) -> Result<UpdateResult> {
        let op = WriteOp::update(filter.clone(), update, false);
        let progress = self
            .write_in(collection, OpKind::Update, filter, op, opts, None)
            .await?;
        Ok(progress.update_result())
    }

    /// Update every document matching `filter`
    pub async fn update_many(
        &self,
        collection: &str,
        filter: serde_json::Value,
        update: serde_json::Value,
        opts: &WriteOptions,
    ) -> Result<UpdateResult> {
        let op = WriteOp::update(filter.clone(), update, true);
        let progress = self
            .write_in(collection, OpKind::Update, filter, op, opts, None)
            .await?;
        Ok(progress.update_result())
    }

    /// Delete the first document matching `filter`
    pub async fn delete_one(
        &self,
        collection: &str,
        filter: serde_json::Value,
        opts: &WriteOptions,
    ) -> Result<DeleteResult> {
        let op = WriteOp::delete(filter.clone(), false);
        let progress = self
            .write_in(collection, OpKind::Delete, filter, op, opts, None)
            .await?;
        Ok(progress.delete_result())
    }

    /// Delete every document matching `filter`
    pub async fn delete_many(
        &self,
        collection: &str,
        filter: serde_json::Value,
        opts: &WriteOptions,
    ) -> Result<DeleteResult> {
        let op = WriteOp::delete(filter.clone(), true);
        let progress = self
            .write_in(collection, OpKind::Delete, filter, op, opts, None)
            .await?;
        Ok(progress.delete_result())
    }
}

// ============================================================================
// Operation internals (shared with sessions)
// ============================================================================

impl Database {
    pub(crate) fn registry(&self) -> &Arc<TransactionRegistry> {
        &self.registry
    }

    /// Registry record of `txn`, which must be active
    pub(crate) fn active_record(&self, txn: TxnId) -> Result<Arc<TxnRecord>> {
        let record = self.registry.get(txn)?;
        match record.state() {
            TxnState::Active => Ok(record),
            state => Err(Error::TransactionNotActive { txn_id: txn, state }),
        }
    }

    /// Run a query, at `txn`'s snapshot if given, and profile it
    pub(crate) async fn find_in(
        &self,
        collection: &str,
        filter: serde_json::Value,
        opts: &FindOptions,
        txn: Option<TxnId>,
    ) -> Result<Vec<Document>> {
        let started = Instant::now();
        let mut stats = OperationStats::default();
        let mut plan = "EOF";
        let command = filter.clone();

        let result = self
            .run_find(collection, filter, opts, txn, &mut stats, &mut plan)
            .await;

        let n = result.as_ref().map(|docs| docs.len() as u64).unwrap_or(0);
        self.profiler.record(OperationProfile::new(
            OpKind::Find,
            collection,
            command,
            plan,
            &stats,
            started.elapsed(),
            n,
            outcome(&result),
            txn,
        ));
        result
    }

    /// Run a write, inside `txn` if given (auto-commit otherwise), and
    /// profile it
    pub(crate) async fn write_in(
        &self,
        collection: &str,
        kind: OpKind,
        command: serde_json::Value,
        op: Result<WriteOp>,
        opts: &WriteOptions,
        txn: Option<(TxnId, &mut IntentSet)>,
    ) -> Result<WriteProgress> {
        let started = Instant::now();
        let mut stats = OperationStats::default();
        let mut plan = "EOF";
        let txn_id = txn.as_ref().map(|(id, _)| *id);

        let result = match (op, txn) {
            (Err(e), _) => Err(e),
            (Ok(op), Some((txn, intents))) => {
                self.write_in_txn(collection, &op, opts, txn, intents, &mut stats, &mut plan)
                    .await
            }
            (Ok(op), None) => {
                self.write_auto_commit(collection, &op, opts, &mut stats, &mut plan)
                    .await
            }
        };

        let n = result.as_ref().map(WriteProgress::affected).unwrap_or(0);
        self.profiler.record(OperationProfile::new(
            kind,
            collection,
            command,
            plan,
            &stats,
            started.elapsed(),
            n,
            outcome(&result),
            txn_id,
        ));
        result
    }

    async fn run_find(
        &self,
        collection: &str,
        filter: serde_json::Value,
        opts: &FindOptions,
        txn: Option<TxnId>,
        stats: &mut OperationStats,
        plan_name: &mut &'static str,
    ) -> Result<Vec<Document>> {
        let filter = Filter::from_json(filter)?;
        // The guard keeps the read point registered until the query is done
        let (snapshot, _guard) = match txn {
            Some(txn) => (self.active_record(txn)?.snapshot(), None),
            None => {
                let guard = self.snapshots.acquire(|| self.clock.now());
                (Snapshot::at(guard.read_ts()), Some(guard))
            }
        };
        if !self.catalog.exists(collection) {
            return Ok(Vec::new());
        }

        let plan = query::plan(collection, &filter, &self.indexes);
        *plan_name = plan.name();
        self.scheduler
            .with_retry(opts.max_wait, stats, || {
                Ok(self.find_attempt(collection, &filter, &plan, &snapshot, opts.limit))
            })
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_in_txn(
        &self,
        collection: &str,
        op: &WriteOp,
        opts: &WriteOptions,
        txn: TxnId,
        intents: &mut IntentSet,
        stats: &mut OperationStats,
        plan_name: &mut &'static str,
    ) -> Result<WriteProgress> {
        let record = self.active_record(txn)?;
        let mut ctx = TxnContext {
            snapshot: record.snapshot(),
            cell: Arc::clone(record.cell()),
            intents,
        };
        let result = self
            .run_write(collection, op, opts, &mut ctx, stats, plan_name)
            .await;

        // A failed statement may have left some of its writes behind, so the
        // transaction cannot go on to commit
        if let Err(e) = &result {
            if e.is_write_conflict() {
                self.metrics.record_write_conflict();
            }
            debug!(target: "tarn::txn", txn_id = %txn, error = %e, "Aborting after failed write");
            if let Err(abort_err) = self.registry.abort(txn) {
                debug!(target: "tarn::txn", txn_id = %txn, error = %abort_err, "Abort after failed write did not apply");
            }
        }
        result
    }

    async fn write_auto_commit(
        &self,
        collection: &str,
        op: &WriteOp,
        opts: &WriteOptions,
        stats: &mut OperationStats,
        plan_name: &mut &'static str,
    ) -> Result<WriteProgress> {
        let max_restarts = self.config.conflict.max_write_conflict_retries as usize;
        let budget = opts
            .max_wait
            .unwrap_or(self.scheduler.policy().default_max_wait);
        // One budget covers every restart of the statement
        let deadline = Instant::now() + budget;
        let mut restarts = 0usize;
        loop {
            let txn = self.registry.begin();
            let mut intents = IntentSet::new();
            let attempt_opts = WriteOptions {
                max_wait: Some(deadline.saturating_duration_since(Instant::now())),
            };
            match self
                .auto_commit_once(txn, &mut intents, collection, op, &attempt_opts, stats, plan_name)
                .await
            {
                Ok(progress) => return Ok(progress),
                Err(e) => {
                    if let Err(abort_err) = self.registry.abort(txn) {
                        debug!(target: "tarn::txn", txn_id = %txn, error = %abort_err, "Abort after failed write did not apply");
                    }
                    if !e.is_write_conflict() {
                        return Err(e);
                    }
                    self.metrics.record_write_conflict();
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if restarts >= max_restarts || remaining.is_zero() {
                        return Err(e);
                    }
                    let delay = self
                        .scheduler
                        .policy()
                        .poll_interval(restarts)
                        .min(remaining);
                    restarts += 1;
                    debug!(target: "tarn::txn", txn_id = %txn, restarts, "Restarting write after conflict");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn auto_commit_once(
        &self,
        txn: TxnId,
        intents: &mut IntentSet,
        collection: &str,
        op: &WriteOp,
        opts: &WriteOptions,
        stats: &mut OperationStats,
        plan_name: &mut &'static str,
    ) -> Result<WriteProgress> {
        let record = self.registry.get(txn)?;
        let mut ctx = TxnContext {
            snapshot: record.snapshot(),
            cell: Arc::clone(record.cell()),
            intents,
        };
        let progress = self
            .run_write(collection, op, opts, &mut ctx, stats, plan_name)
            .await?;
        self.registry.prepare(txn, std::mem::take(ctx.intents))?;
        self.registry.commit(txn)?;
        Ok(progress)
    }

    async fn run_write(
        &self,
        collection: &str,
        op: &WriteOp,
        opts: &WriteOptions,
        ctx: &mut TxnContext<'_>,
        stats: &mut OperationStats,
        plan_name: &mut &'static str,
    ) -> Result<WriteProgress> {
        match op.filter() {
            None => {
                self.catalog.ensure(collection)?;
                *plan_name = "INSERT";
            }
            Some(_) if !self.catalog.exists(collection) => return Ok(WriteProgress::default()),
            Some(filter) => *plan_name = query::plan(collection, filter, &self.indexes).name(),
        }

        let mut progress = WriteProgress::default();
        self.scheduler
            .with_retry(opts.max_wait, stats, || {
                self.write_attempt(collection, op, ctx, &mut progress)
            })
            .await?;
        Ok(progress)
    }

    // ------------------------------------------------------------------------
    // Attempts
    // ------------------------------------------------------------------------

    fn find_attempt(
        &self,
        collection: &str,
        filter: &Filter,
        plan: &Plan,
        snapshot: &Snapshot,
        limit: Option<usize>,
    ) -> Attempt<Vec<Document>> {
        if let RangeResolution::PrepareConflict(txn) =
            self.detector.resolve_range(plan.range(), snapshot)
        {
            return Attempt::Conflict(txn);
        }

        let limit = limit.unwrap_or(usize::MAX);
        let mut docs = Vec::new();
        match plan {
            Plan::IdRange(range) | Plan::CollectionScan(range) => {
                for (_, versions) in self.store.scan(range) {
                    let resolution = resolve_versions(&versions, snapshot);
                    if let Some(txn) = collect_match(resolution, filter, &mut docs) {
                        return Attempt::Conflict(txn);
                    }
                    if docs.len() >= limit {
                        break;
                    }
                }
            }
            Plan::IndexRange { index, range } => {
                for id in index.lookup(range) {
                    let key = RecordKey::new(collection, id);
                    let resolution = self.detector.resolve(&key, snapshot);
                    if let Some(txn) = collect_match(resolution, filter, &mut docs) {
                        return Attempt::Conflict(txn);
                    }
                    if docs.len() >= limit {
                        break;
                    }
                }
            }
        }
        Attempt::Ready(docs)
    }

    fn write_attempt(
        &self,
        collection: &str,
        op: &WriteOp,
        ctx: &mut TxnContext<'_>,
        progress: &mut WriteProgress,
    ) -> Result<Attempt<()>> {
        match op {
            WriteOp::Insert(docs) => {
                // Documents inserted by earlier attempts are skipped
                for doc in &docs[progress.inserted.len()..] {
                    let id = doc.id().cloned().unwrap_or(Value::Null);
                    let version = RecordVersion::new(
                        RecordKey::new(collection, id.clone()),
                        doc.clone(),
                        Arc::clone(&ctx.cell),
                    );
                    match self.detector.write(version, &ctx.snapshot, true)? {
                        WriteResolution::PrepareConflict(txn) => return Ok(Attempt::Conflict(txn)),
                        WriteResolution::Applied { version, previous } => {
                            self.record_write(ctx, &version, previous.as_deref());
                            progress.inserted.push(id);
                        }
                    }
                }
                Ok(Attempt::Ready(()))
            }
            WriteOp::Update {
                filter,
                update,
                multi,
            } => self.modify_attempt(collection, filter, *multi, ctx, progress, |doc| {
                update.apply(doc).map(Some)
            }),
            WriteOp::Delete { filter, multi } => {
                self.modify_attempt(collection, filter, *multi, ctx, progress, |_| Ok(None))
            }
        }
    }

    /// Rewrite matching documents; `change` returns the new document or
    /// `None` to delete
    fn modify_attempt(
        &self,
        collection: &str,
        filter: &Filter,
        multi: bool,
        ctx: &mut TxnContext<'_>,
        progress: &mut WriteProgress,
        change: impl Fn(&Document) -> Result<Option<Document>>,
    ) -> Result<Attempt<()>> {
        if !multi && !progress.matched.is_empty() {
            return Ok(Attempt::Ready(()));
        }

        let plan = query::plan(collection, filter, &self.indexes);
        let docs = match self.find_attempt(collection, filter, &plan, &ctx.snapshot, None) {
            Attempt::Ready(docs) => docs,
            Attempt::Conflict(txn) => return Ok(Attempt::Conflict(txn)),
        };

        for doc in docs {
            let Some(id) = doc.id().cloned() else {
                continue;
            };
            if progress.matched.contains(&id) {
                continue;
            }

            let key = RecordKey::new(collection, id.clone());
            let next = change(&doc)?;
            if next.as_ref() != Some(&doc) {
                let version = match next {
                    Some(next) => RecordVersion::new(key, next, Arc::clone(&ctx.cell)),
                    None => RecordVersion::tombstone(key, Arc::clone(&ctx.cell)),
                };
                match self.detector.write(version, &ctx.snapshot, false)? {
                    WriteResolution::PrepareConflict(txn) => return Ok(Attempt::Conflict(txn)),
                    WriteResolution::Applied { version, previous } => {
                        self.record_write(ctx, &version, previous.as_deref());
                        if version.is_tombstone() {
                            progress.deleted += 1;
                        } else {
                            progress.modified += 1;
                        }
                    }
                }
            }
            progress.matched.insert(id);
            if !multi {
                break;
            }
        }
        Ok(Attempt::Ready(()))
    }

    /// Index a freshly written version and declare the keys it touches
    fn record_write(
        &self,
        ctx: &mut TxnContext<'_>,
        version: &RecordVersion,
        previous: Option<&RecordVersion>,
    ) {
        self.indexes.index_version(version);

        let key = version.key();
        ctx.intents.add(KeyRange::point(
            KeySpace::primary(key.collection.clone()),
            key.id.clone(),
        ));
        for index in self.indexes.indexes(&key.collection) {
            let field = index.field();
            if let Some(previous) = previous.filter(|p| !p.is_tombstone()) {
                ctx.intents
                    .add(KeyRange::point(index.space(), previous.payload().get_or_null(field)));
            }
            if !version.is_tombstone() {
                ctx.intents
                    .add(KeyRange::point(index.space(), version.payload().get_or_null(field)));
            }
        }
    }
}
