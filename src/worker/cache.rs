//! Bounded endpoint reuse cache.
//!
//! # Responsibilities
//! - Keep up to `capacity` released endpoints per worker
//! - Discard entries idle longer than the configured timeout
//!
//! # Design Decisions
//! - LIFO: the most recently released entry is handed out first
//! - A plain mutex guards push/pop; nothing blocking happens under it
//! - Limits live under the same mutex so a refresh can change them in place

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Slots<T> {
    entries: Vec<(T, Instant)>,
    capacity: usize,
    idle_timeout: Option<Duration>,
}

/// A free list of reusable items with an idle timeout.
#[derive(Debug)]
pub struct EndpointCache<T> {
    slots: Mutex<Slots<T>>,
}

impl<T> EndpointCache<T> {
    pub fn new(capacity: usize, idle_timeout: Option<Duration>) -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: Vec::with_capacity(capacity),
                capacity,
                idle_timeout,
            }),
        }
    }

    /// Take the freshest entry, dropping any that sat idle too long.
    pub fn take(&self) -> Option<T> {
        self.take_at(Instant::now())
    }

    pub(crate) fn take_at(&self, now: Instant) -> Option<T> {
        let mut slots = self.lock();
        if let Some(timeout) = slots.idle_timeout {
            let before = slots.entries.len();
            slots
                .entries
                .retain(|(_, released)| now.saturating_duration_since(*released) <= timeout);
            let expired = before - slots.entries.len();
            if expired > 0 {
                tracing::debug!(expired, "Discarded idle cached endpoints");
            }
        }
        slots.entries.pop().map(|(item, _)| item)
    }

    /// Return an entry; returns false (and drops it) when the cache is full.
    pub fn put(&self, item: T) -> bool {
        self.put_at(item, Instant::now())
    }

    pub(crate) fn put_at(&self, item: T, now: Instant) -> bool {
        let mut slots = self.lock();
        if slots.entries.len() >= slots.capacity {
            return false;
        }
        slots.entries.push((item, now));
        true
    }

    /// Change the limits. Shrinking drops the oldest entries first.
    pub fn reconfigure(&self, capacity: usize, idle_timeout: Option<Duration>) {
        let mut slots = self.lock();
        slots.capacity = capacity;
        slots.idle_timeout = idle_timeout;
        let excess = slots.entries.len().saturating_sub(capacity);
        if excess > 0 {
            slots.entries.drain(..excess);
            tracing::debug!(dropped = excess, capacity, "Endpoint cache shrunk");
        }
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifo_and_capacity() {
        let cache = EndpointCache::new(2, None);
        assert!(cache.put(1));
        assert!(cache.put(2));
        assert!(!cache.put(3));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.take(), Some(2));
        assert_eq!(cache.take(), Some(1));
        assert_eq!(cache.take(), None);
    }

    #[test]
    fn test_idle_entries_are_discarded() {
        let cache = EndpointCache::new(4, Some(Duration::from_secs(15)));
        let start = Instant::now();
        cache.put_at("old", start);
        cache.put_at("fresh", start + Duration::from_secs(10));

        let now = start + Duration::from_secs(20);
        assert_eq!(cache.take_at(now), Some("fresh"));
        assert_eq!(cache.take_at(now), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_never_caches() {
        let cache = EndpointCache::new(0, None);
        assert!(!cache.put(()));
        assert!(cache.take().is_none());
    }

    #[test]
    fn test_reconfigure_shrinks_and_changes_timeout() {
        let cache = EndpointCache::new(3, None);
        let start = Instant::now();
        cache.put_at("first", start);
        cache.put_at("second", start + Duration::from_secs(5));
        cache.put_at("third", start + Duration::from_secs(10));

        cache.reconfigure(2, Some(Duration::from_secs(8)));
        assert_eq!(cache.capacity(), 2);
        assert_eq!(cache.len(), 2);
        assert!(!cache.put("fourth"));

        // "second" is now past the new idle timeout.
        let now = start + Duration::from_secs(14);
        assert_eq!(cache.take_at(now), Some("third"));
        assert_eq!(cache.take_at(now), None);

        cache.reconfigure(4, None);
        assert!(cache.put("fifth"));
        assert_eq!(cache.capacity(), 4);
    }
}
