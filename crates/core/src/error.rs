//! Error types for Tarn
//!
//! This module defines all error types that cross the engine boundary.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Prepare conflicts are deliberately absent: they are an internal retry
//! signal and never reach callers. A caller sees either a result, a
//! `MaxTimeExpired` after waiting on a prepared transaction, or one of the
//! errors below.

use crate::txn::TxnState;
use crate::types::{RecordKey, TxnId};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Tarn operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Tarn engine
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// A transaction state change was requested out of order
    ///
    /// Fatal to the calling operation, never retried.
    #[error("Invalid transition for {txn_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        /// Transaction whose transition was rejected
        txn_id: TxnId,
        /// State observed at the time of the request
        from: TxnState,
        /// Requested target state name
        to: &'static str,
    },

    /// Operation exceeded its time budget while blocked on a prepared transaction
    ///
    /// Carries no side effects: the engine state is unchanged.
    #[error("operation exceeded time limit after {waited:?} waiting on prepared {blocking_txn}")]
    MaxTimeExpired {
        /// Prepared transaction the operation was blocked on last
        blocking_txn: TxnId,
        /// Total time spent waiting
        waited: Duration,
    },

    /// Write-write conflict with a concurrent transaction
    #[error("Write conflict on {key}")]
    WriteConflict {
        /// Contended record
        key: RecordKey,
    },

    /// Transaction id unknown to the registry
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TxnId),

    /// Operation requires an active transaction
    #[error("Transaction {txn_id} is not active (state: {state})")]
    TransactionNotActive {
        /// Transaction the operation was issued on
        txn_id: TxnId,
        /// Its current state
        state: TxnState,
    },

    /// Collection does not exist
    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    /// Collection already exists
    #[error("Namespace already exists: {0}")]
    NamespaceExists(String),

    /// Insert of an `_id` that is already present
    #[error("Duplicate key: {0}")]
    DuplicateKey(RecordKey),

    /// Malformed request (filter, update, document)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be read or is invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if the caller may retry the whole operation later
    ///
    /// Timeouts and write conflicts are transient; everything else reflects
    /// a request that will fail again as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::MaxTimeExpired { .. } | Error::WriteConflict { .. }
        )
    }

    /// Stable error code name, as reported in operation profiles
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidTransition { .. } => "InvalidTransition",
            Error::MaxTimeExpired { .. } => "MaxTimeExpired",
            Error::WriteConflict { .. } => "WriteConflict",
            Error::TransactionNotFound(_) => "NoSuchTransaction",
            Error::TransactionNotActive { .. } => "TransactionNotActive",
            Error::NamespaceNotFound(_) => "NamespaceNotFound",
            Error::NamespaceExists(_) => "NamespaceExists",
            Error::DuplicateKey(_) => "DuplicateKey",
            Error::InvalidInput(_) => "BadValue",
            Error::Config(_) => "InvalidConfig",
        }
    }

    /// Check if this is a prepare-conflict timeout
    pub fn is_max_time_expired(&self) -> bool {
        matches!(self, Error::MaxTimeExpired { .. })
    }

    /// Check if this is a write-write conflict
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, Error::WriteConflict { .. })
    }
}
