//! Per-agent duplicate suppression
//!
//! A bounded FIFO of recently accepted sequence numbers. Membership is exact
//! value equality, so a sequence number that wrapped around and already left
//! the window is accepted again as new.

use std::collections::VecDeque;

/// Default number of sequence numbers remembered per agent
pub const DEFAULT_DEDUP_WINDOW: usize = 100;

#[derive(Debug, Clone)]
pub struct DedupWindow {
    capacity: usize,
    seen: VecDeque<u16>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            seen: VecDeque::with_capacity(capacity),
        }
    }

    pub fn contains(&self, seq: u16) -> bool {
        self.seen.contains(&seq)
    }

    /// Record `seq` as accepted. Returns `false` if it was already present.
    pub fn insert(&mut self, seq: u16) -> bool {
        if self.contains(seq) {
            return false;
        }
        if self.seen.len() == self.capacity {
            self.seen.pop_front();
        }
        self.seen.push_back(seq);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}
