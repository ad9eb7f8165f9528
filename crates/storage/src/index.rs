//! Secondary indices for efficient query patterns
//!
//! An index maps field values to the `_id`s of records holding them. Entries
//! are not versioned: an entry exists if *any* retained version of the record
//! carries that value, including pending and aborted ones. Index lookups
//! therefore yield candidates only, and readers resolve each candidate
//! through the version store and re-check their predicate.
//!
//! Entries outlive the versions that produced them until the reclaimer calls
//! [`IndexCatalog::refresh`] for the record.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tarn_core::{KeyRange, KeySpace, RecordKey, Value};

use crate::store::as_ref_bound;
use crate::version::RecordVersion;

#[derive(Debug, Default)]
struct Entries {
    /// value -> ids holding it
    by_value: BTreeMap<Value, BTreeSet<Value>>,
    /// id -> values it holds (reverse map for cleanup)
    by_id: FxHashMap<Value, BTreeSet<Value>>,
}

/// Secondary index on one field of one collection
#[derive(Debug)]
pub struct SecondaryIndex {
    collection: String,
    field: String,
    entries: RwLock<Entries>,
}

impl SecondaryIndex {
    /// Create an empty index
    pub fn new(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Indexed collection
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Indexed field path
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Key space of this index's entries
    pub fn space(&self) -> KeySpace {
        KeySpace::index(self.collection.clone(), self.field.clone())
    }

    /// Add an entry
    pub fn insert(&self, id: Value, value: Value) {
        let mut entries = self.entries.write();
        entries
            .by_value
            .entry(value.clone())
            .or_default()
            .insert(id.clone());
        entries.by_id.entry(id).or_default().insert(value);
    }

    /// Remove an entry
    pub fn remove(&self, id: &Value, value: &Value) {
        let mut entries = self.entries.write();
        remove_entry(&mut entries, id, value);
    }

    /// Keep only the entries of `id` whose value is in `live`
    pub fn retain_for(&self, id: &Value, live: &BTreeSet<Value>) {
        let mut entries = self.entries.write();
        let stale: Vec<Value> = match entries.by_id.get(id) {
            Some(values) => values.difference(live).cloned().collect(),
            None => return,
        };
        for value in &stale {
            remove_entry(&mut entries, id, value);
        }
    }

    /// Candidate ids whose indexed value falls in `range`, ascending and
    /// deduplicated
    pub fn lookup(&self, range: &KeyRange) -> Vec<Value> {
        if range.is_empty() {
            return Vec::new();
        }
        let entries = self.entries.read();
        let bounds = (as_ref_bound(&range.lower), as_ref_bound(&range.upper));
        let ids: BTreeSet<&Value> = entries
            .by_value
            .range::<Value, _>(bounds)
            .flat_map(|(_, ids)| ids.iter())
            .collect();
        ids.into_iter().cloned().collect()
    }

    /// Number of (value, id) entries
    pub fn len(&self) -> usize {
        self.entries.read().by_id.values().map(BTreeSet::len).sum()
    }

    /// Check if the index has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().by_id.is_empty()
    }
}

fn remove_entry(entries: &mut Entries, id: &Value, value: &Value) {
    if let Some(ids) = entries.by_value.get_mut(value) {
        ids.remove(id);
        if ids.is_empty() {
            entries.by_value.remove(value);
        }
    }
    if let Some(values) = entries.by_id.get_mut(id) {
        values.remove(value);
        if values.is_empty() {
            entries.by_id.remove(id);
        }
    }
}

/// All secondary indexes, grouped by collection
#[derive(Debug, Default)]
pub struct IndexCatalog {
    by_collection: DashMap<String, Vec<Arc<SecondaryIndex>>>,
}

impl IndexCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an index on `collection.field`
    ///
    /// Returns `None` if one already exists.
    pub fn create(&self, collection: &str, field: &str) -> Option<Arc<SecondaryIndex>> {
        let mut indexes = self.by_collection.entry(collection.to_string()).or_default();
        if indexes.iter().any(|ix| ix.field() == field) {
            return None;
        }
        let index = Arc::new(SecondaryIndex::new(collection, field));
        indexes.push(Arc::clone(&index));
        Some(index)
    }

    /// Index on `collection.field`, if any
    pub fn get(&self, collection: &str, field: &str) -> Option<Arc<SecondaryIndex>> {
        self.by_collection
            .get(collection)?
            .iter()
            .find(|ix| ix.field() == field)
            .cloned()
    }

    /// All indexes of a collection, in creation order
    pub fn indexes(&self, collection: &str) -> Vec<Arc<SecondaryIndex>> {
        self.by_collection
            .get(collection)
            .map(|ixs| ixs.value().clone())
            .unwrap_or_default()
    }

    /// Add entries for a freshly written version
    ///
    /// Tombstones add nothing. A document missing the field is indexed
    /// under `Null`.
    pub fn index_version(&self, version: &RecordVersion) {
        if version.is_tombstone() {
            return;
        }
        let key = version.key();
        for index in self.indexes(&key.collection) {
            index.insert(key.id.clone(), version.payload().get_or_null(index.field()));
        }
    }

    /// Drop entries of `key` no longer backed by any retained version
    pub fn refresh(&self, key: &RecordKey, versions: &[Arc<RecordVersion>]) {
        for index in self.indexes(&key.collection) {
            let live: BTreeSet<Value> = versions
                .iter()
                .filter(|v| !v.is_tombstone())
                .map(|v| v.payload().get_or_null(index.field()))
                .collect();
            index.retain_for(&key.id, &live);
        }
    }

    /// Forget every index of a collection
    pub fn drop_collection(&self, collection: &str) {
        self.by_collection.remove(collection);
    }
}
