//! Storage layer for Tarn
//!
//! This crate implements the multi-version record store:
//! - RecordVersion: one immutable entry in a record's history
//! - VersionChain: newest-first history of one record
//! - VersionStore: DashMap-sharded histories, ordered by `_id` per collection
//! - Secondary indices (SecondaryIndex, IndexCatalog)
//!
//! Visibility is not decided here. A version's fate is read through its
//! creating transaction's shared cell; the conflict detector in
//! `tarn-concurrency` walks histories against a snapshot.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod index;
pub mod store;
pub mod version;

pub use chain::VersionChain;
pub use index::{IndexCatalog, SecondaryIndex};
pub use store::{ReclaimReport, VersionStore};
pub use version::RecordVersion;
