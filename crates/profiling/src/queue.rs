//! Bounded store of finished profiles awaiting their transaction.

use std::collections::{HashMap, VecDeque};

/// Default number of profiles kept before the oldest is evicted.
pub const DEFAULT_PROFILE_QUEUE_CAPACITY: usize = 20;

/// Profiles keyed by identifier, evicting the oldest entry when full.
///
/// An entry is handed out at most once: [`ProfileQueue::take`] removes it.
#[derive(Debug)]
pub struct ProfileQueue<T> {
    entries: HashMap<String, T>,
    /// Insertion order, oldest first
    order: VecDeque<String>,
    capacity: usize,
}

impl<T> Default for ProfileQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_PROFILE_QUEUE_CAPACITY)
    }
}

impl<T> ProfileQueue<T> {
    /// Create a queue holding at most `capacity` profiles (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert a profile, returning the evicted entry if the queue was full.
    ///
    /// Re-inserting an existing id replaces the value and refreshes its age.
    pub fn insert(&mut self, id: impl Into<String>, value: T) -> Option<(String, T)> {
        let id = id.into();

        if self.entries.remove(&id).is_some() {
            self.order.retain(|existing| existing != &id);
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.order
                .pop_front()
                .and_then(|oldest| self.entries.remove(&oldest).map(|v| (oldest, v)))
        } else {
            None
        };

        if let Some((evicted_id, _)) = &evicted {
            tracing::debug!("Evicted unclaimed profile {}", evicted_id);
        }

        self.order.push_back(id.clone());
        self.entries.insert(id, value);
        evicted
    }

    /// Remove and return the profile with the given id.
    pub fn take(&mut self, id: &str) -> Option<T> {
        let value = self.entries.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(value)
    }

    /// Check if a profile is queued.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of queued profiles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of profiles held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all queued profiles.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}
