//! Database engine for Tarn
//!
//! This crate puts a document API on top of the prepare conflict manager:
//! - Database: open/close, collections, indexes, auto-commit operations
//! - Session: explicit transactions with prepare/commit/abort
//! - Query planning and update application
//! - Operation profiler (prepare read conflicts per operation)
//! - Background reclaimer for version history
//!
//! Operations never fail on a prepare conflict. They wait for the prepared
//! transaction to resolve, bounded by their wait budget, and fail with
//! `MaxTimeExpired` only once that budget is spent.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod database;
pub mod profiler;
pub mod query;
pub mod reclaimer;
pub mod session;
pub mod update;

pub use catalog::{Catalog, CollectionInfo};
pub use database::{
    ConflictConfig, Database, DeleteResult, FindOptions, ProfileLevel, ProfilerConfig,
    ReclaimConfig, TarnConfig, UpdateResult, WriteOptions, CONFIG_FILE_NAME,
};
pub use profiler::{OpKind, OperationProfile, Profiler};
pub use query::{Condition, Filter, Plan};
pub use reclaimer::{ReclaimStats, Reclaimer};
pub use session::Session;
pub use update::{UpdateOp, UpdateSpec};
