//! Logical transaction clock
//!
//! Single monotonic counter for the whole database. Every start, prepare and
//! commit draws a fresh tick, so no two events share a timestamp.

use std::sync::atomic::{AtomicU64, Ordering};

use tarn_core::Timestamp;

/// Monotonic logical clock
#[derive(Debug, Default)]
pub struct LogicalClock {
    now: AtomicU64,
}

impl LogicalClock {
    /// Create a clock at `Timestamp::ZERO`
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return the new timestamp
    pub fn tick(&self) -> Timestamp {
        Timestamp::from_raw(self.now.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Latest timestamp handed out
    pub fn now(&self) -> Timestamp {
        Timestamp::from_raw(self.now.load(Ordering::SeqCst))
    }
}
