//! Write intents
//!
//! An `IntentSet` declares every key a transaction may have affected: the
//! primary-key point of each written record, plus old and new index-entry
//! points when an indexed field changes. Once the transaction prepares, its
//! set is frozen and range readers test their scan ranges against it to
//! catch phantoms.

use smallvec::SmallVec;
use tarn_core::KeyRange;

/// Key ranges a transaction may affect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntentSet {
    ranges: SmallVec<[KeyRange; 4]>,
}

impl IntentSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a range (exact duplicates are ignored)
    pub fn add(&mut self, range: KeyRange) {
        if !self.ranges.contains(&range) {
            self.ranges.push(range);
        }
    }

    /// Merge another set into this one
    pub fn merge(&mut self, other: IntentSet) {
        for range in other.ranges {
            self.add(range);
        }
    }

    /// Check if any intent overlaps `range`
    pub fn overlaps(&self, range: &KeyRange) -> bool {
        self.ranges.iter().any(|intent| intent.overlaps(range))
    }

    /// Iterate intents in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &KeyRange> {
        self.ranges.iter()
    }

    /// Number of intents
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl FromIterator<KeyRange> for IntentSet {
    fn from_iter<I: IntoIterator<Item = KeyRange>>(iter: I) -> Self {
        let mut set = IntentSet::new();
        for range in iter {
            set.add(range);
        }
        set
    }
}
