use std::collections::VecDeque;

use crate::model::CheckResult;

/// Fixed-capacity circular buffer of check results. O(1) insert, evicts oldest when full.
#[derive(Debug, Clone)]
pub struct ResultRing {
    buffer: VecDeque<CheckResult>,
    capacity: usize,
}

impl ResultRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Builds a ring from chronologically ordered results, keeping the newest.
    pub fn from_chronological(capacity: usize, results: Vec<CheckResult>) -> Self {
        let mut ring = Self::new(capacity);
        for r in results {
            ring.push(r);
        }
        ring
    }

    pub fn push(&mut self, result: CheckResult) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(result);
    }

    /// Newest first.
    pub fn list(&self) -> impl Iterator<Item = &CheckResult> {
        self.buffer.iter().rev()
    }

    pub fn list_chronological(&self) -> Vec<CheckResult> {
        self.buffer.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&CheckResult> {
        self.buffer.back()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
