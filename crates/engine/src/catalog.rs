//! Collection catalog
//!
//! Tracks which collections exist. Collections are created explicitly or
//! implicitly by the first insert.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tarn_core::{Error, Result};
use tracing::debug;

/// Metadata for one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    /// Collection name
    pub name: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Set of existing collections
#[derive(Debug, Default)]
pub struct Catalog {
    collections: DashMap<String, CollectionInfo>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a collection
    ///
    /// # Errors
    ///
    /// `NamespaceExists` if it is already there, `InvalidInput` for a bad name.
    pub fn create(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        match self.collections.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(Error::NamespaceExists(name.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(CollectionInfo {
                    name: name.to_string(),
                    created_at: Utc::now(),
                });
                debug!(target: "tarn::catalog", collection = name, "Collection created");
                Ok(())
            }
        }
    }

    /// Create a collection unless it exists; returns true if created
    pub fn ensure(&self, name: &str) -> Result<bool> {
        match self.create(name) {
            Ok(()) => Ok(true),
            Err(Error::NamespaceExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Check if a collection exists
    pub fn exists(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    /// Collection metadata
    pub fn get(&self, name: &str) -> Option<CollectionInfo> {
        self.collections.get(name).map(|info| info.value().clone())
    }

    /// Remove a collection from the catalog
    pub fn drop(&self, name: &str) -> Result<()> {
        self.collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NamespaceNotFound(name.to_string()))
    }

    /// Collection names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput("collection name is empty".into()));
    }
    if name.contains('$') || name.contains('\0') {
        return Err(Error::InvalidInput(format!(
            "invalid collection name: {:?}",
            name
        )));
    }
    Ok(())
}
