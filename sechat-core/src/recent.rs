// ABOUTME: Bounded FIFO of recently dispatched event ids for at-most-once dispatch
// ABOUTME: Owned by the poll loop, so it needs no lock of its own

use std::collections::VecDeque;

/// Number of event ids remembered by default
pub const RECENT_EVENT_CAPACITY: usize = 30;

#[derive(Debug, Clone)]
pub struct RecentEventWindow {
    ids: VecDeque<u64>,
    capacity: usize,
}

impl Default for RecentEventWindow {
    fn default() -> Self {
        Self::new(RECENT_EVENT_CAPACITY)
    }
}

impl RecentEventWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ids: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record an event id. Returns false if it was already in the window.
    ///
    /// When full, the oldest id is evicted first.
    pub fn check_and_record(&mut self, id: u64) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        if self.ids.len() >= self.capacity {
            self.ids.pop_front();
        }
        self.ids.push_back(id);
        true
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
