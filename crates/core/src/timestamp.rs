//! Logical timestamp type
//!
//! Timestamps order transaction events: start (read snapshot), prepare and
//! commit. They are allocated from a single monotonic logical clock, so a
//! larger timestamp always denotes a later event in the process.
//!
//! ## Usage
//!
//! Never expose raw arithmetic. Use explicit constructors:
//!
//! ```
//! use tarn_core::Timestamp;
//!
//! let ts = Timestamp::from_raw(10);
//! assert!(ts.next() > ts);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical timestamp
///
/// ## Invariants
///
/// - `Timestamp::ZERO` precedes every allocated timestamp
/// - Allocated timestamps fit in 63 bits (the top bit is reserved by the
///   transaction resolution cell)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The timestamp before any event
    pub const ZERO: Timestamp = Timestamp(0);

    /// Largest timestamp a resolution cell can carry
    pub const MAX: Timestamp = Timestamp((1 << 63) - 1);

    /// Create a timestamp from a raw counter value
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Timestamp(raw)
    }

    /// Raw counter value
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The immediately following timestamp
    #[inline]
    pub const fn next(&self) -> Self {
        Timestamp(self.0 + 1)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ts:{}", self.0)
    }
}
