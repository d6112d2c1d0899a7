//! Bounded de-duplication of push notification ids.
//!
//! Notification delivery is at-least-once, so the same id may arrive more
//! than once. The set remembers which ids already had their side effect and
//! evicts the oldest entry once it is full. Eviction trades unbounded memory
//! for a small accepted risk: a duplicate older than the last `capacity`
//! distinct notifications would be reprocessed.

use std::collections::{HashSet, VecDeque};

use sutler_domain::NotificationId;

/// Default number of handled notification ids to remember.
pub const DEDUP_CAPACITY: usize = 100;

/// FIFO-eviction set of already-handled notification ids.
#[derive(Debug)]
pub struct NotificationDedupSet {
    /// Membership check
    seen: HashSet<NotificationId>,
    /// Insertion order, oldest at the front
    order: VecDeque<NotificationId>,
    /// Maximum number of remembered ids
    capacity: usize,
}

impl NotificationDedupSet {
    /// Create a set remembering at most `capacity` ids.
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record an id. Returns `true` when the id was not present, meaning the
    /// caller should perform the side effect; `false` for a duplicate.
    pub fn insert(&mut self, id: NotificationId) -> bool {
        if self.seen.contains(&id) {
            return false;
        }

        self.seen.insert(id.clone());
        self.order.push_back(id);

        // Full: forget the oldest id.
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    /// Check membership without recording.
    pub fn contains(&self, id: &NotificationId) -> bool {
        self.seen.contains(id)
    }

    /// Number of remembered ids.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when nothing has been remembered yet.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for NotificationDedupSet {
    fn default() -> Self {
        Self::new(DEDUP_CAPACITY)
    }
}

// =============================================================================
// Tests
// =============================================================================
