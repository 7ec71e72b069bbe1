//! Bounded dedup ledger for processed event ids.

use std::collections::{HashSet, VecDeque};

/// Number of processed ids remembered.
pub const DEFAULT_LEDGER_CAPACITY: usize = 500;

/// Insertion-ordered set of event ids; the oldest id is evicted on overflow.
#[derive(Debug, Clone)]
pub struct DedupLedger {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl Default for DedupLedger {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LEDGER_CAPACITY)
    }
}

impl DedupLedger {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Rebuild from persisted ids, oldest first. Keeps only the newest `capacity`.
    pub fn from_ids<I: IntoIterator<Item = String>>(ids: I, capacity: usize) -> Self {
        let mut ledger = Self::with_capacity(capacity);
        for id in ids {
            ledger.insert(id);
        }
        ledger
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Record `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: String) -> bool {
        if self.members.contains(&id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.members.insert(id.clone());
        self.order.push_back(id);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids oldest first.
    pub fn ids(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }
}
