//! Core types for Tarn
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: Unified value enum with a total order
//! - Document: Field map with an `_id` identity
//! - TxnId / RecordKey: Transaction and record identities
//! - Timestamp: Logical timestamps from the transaction clock
//! - KeySpace / KeyRange: Intervals over primary keys and index entries
//! - TxnState / TxnCell: Transaction lifecycle and its shared resolution cell
//! - Error: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod error;
pub mod range;
pub mod timestamp;
pub mod txn;
pub mod types;
pub mod value;

pub use document::{Document, ID_FIELD};
pub use error::{Error, Result};
pub use range::{KeyRange, KeySpace};
pub use timestamp::Timestamp;
pub use txn::{TxnCell, TxnState};
pub use types::{RecordKey, TxnId};
pub use value::Value;
