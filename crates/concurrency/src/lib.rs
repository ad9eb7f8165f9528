//! Concurrency layer for Tarn
//!
//! This crate implements the prepare conflict manager:
//! - LogicalClock: Monotonic timestamps for start, prepare and commit
//! - TransactionRegistry: Lifecycle, prepared intents, resolution
//! - ConflictDetector: Snapshot visibility over version histories
//! - RetryScheduler: Suspend/resume of operations blocked on prepared txns
//! - ResolutionNotifier: Wakes parked operations on commit/abort
//! - SnapshotTracker: Live read points and the reclamation horizon
//!
//! Readers and writers never block inside the detector. A prepared version
//! in the way surfaces as a conflict, the scheduler parks the operation and
//! re-runs it once the transaction resolves or its budget runs out.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod detector;
pub mod intent;
pub mod metrics;
pub mod notifier;
pub mod registry;
pub mod scheduler;
pub mod snapshot;

pub use clock::LogicalClock;
pub use detector::{resolve_versions, ConflictDetector, RangeResolution, Resolution, WriteResolution};
pub use intent::IntentSet;
pub use metrics::{ConflictMetrics, ConflictStats, TransactionMetrics};
pub use notifier::{ConflictWaiter, ResolutionNotifier, WakeReason};
pub use registry::{TransactionRegistry, TxnRecord};
pub use scheduler::{Attempt, OperationStats, RetryPolicy, RetryScheduler};
pub use snapshot::{Snapshot, SnapshotGuard, SnapshotTracker};
