//! Recent-notification ring
//!
//! Bounded history of `(device id, notification id)` pairs. Phones resend an
//! event when a transport retries or when they are reachable over several
//! transports at once; the ring only needs to span that short window.

use std::collections::{HashSet, VecDeque};

type Key = (String, String);

/// Bounded FIFO set of recently seen notification keys
#[derive(Debug)]
pub struct RecentNotifications {
    order: VecDeque<Key>,
    seen: HashSet<Key>,
    capacity: usize,
}

impl RecentNotifications {
    /// Create a ring holding at most `capacity` keys (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a key, returning `false` if it is already in the window
    ///
    /// Inserting past capacity evicts the oldest key, which may then be
    /// delivered again.
    pub fn insert(&mut self, device_id: &str, notification_id: &str) -> bool {
        let key = (device_id.to_string(), notification_id.to_string());
        if self.seen.contains(&key) {
            return false;
        }

        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }

    /// Whether a key is in the window
    pub fn contains(&self, device_id: &str, notification_id: &str) -> bool {
        self.seen
            .contains(&(device_id.to_string(), notification_id.to_string()))
    }

    /// Keys currently held
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the window holds no keys
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Keys held before the oldest is evicted
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
