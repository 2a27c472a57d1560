//! Bounded memory of applied idempotency keys.
//!
//! A window travels inside the record it protects, so checking a key and
//! recording it happen in the same compare-and-swap write as the effect.

use std::collections::VecDeque;

/// Default number of keys remembered per record.
pub const DEFAULT_DEDUP_WINDOW: usize = 4096;

/// Recently applied keys and the value each one produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupWindow<V> {
    entries: VecDeque<(String, V)>,
}

impl<V> DedupWindow<V> {
    /// An empty window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// The value recorded for `key`, if it is still remembered.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remember `key`, evicting the oldest keys beyond `capacity`.
    pub fn record(&mut self, key: impl Into<String>, value: V, capacity: usize) {
        self.entries.push_back((key.into(), value));
        while self.entries.len() > capacity.max(1) {
            self.entries.pop_front();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for DedupWindow<V> {
    fn default() -> Self {
        Self::new()
    }
}
