//! Least-recently-used eviction order for the buffer pool.
//!
//! Tracked as a logical clock rather than an intrusive linked list: every
//! access stamps the page with the next tick, and the page with the smallest
//! live tick is the eviction candidate. A page's old stamp is retired before
//! its new one is recorded, so at most one stamp per page is ever live.

use std::collections::{BTreeMap, HashMap};

pub struct LruCache {
    /// Monotonically increasing counter; the next tick handed out on access.
    clock: u64,
    /// Each resident page's most recent tick.
    stamped: HashMap<u32, u64>,
    /// Inverse index: tick -> page, ordered so the front is the oldest tick.
    by_recency: BTreeMap<u64, u32>,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            clock: 0,
            stamped: HashMap::with_capacity(capacity),
            by_recency: BTreeMap::new(),
        }
    }

    /// Record a touch of `page_id`, making it the most recently used entry.
    pub fn access(&mut self, page_id: u32) {
        if let Some(old_tick) = self.stamped.get(&page_id) {
            self.by_recency.remove(old_tick);
        }
        let tick = self.next_tick();
        self.stamped.insert(page_id, tick);
        self.by_recency.insert(tick, page_id);
    }

    /// Drop `page_id` from the tracked set entirely.
    pub fn remove(&mut self, page_id: u32) {
        if let Some(tick) = self.stamped.remove(&page_id) {
            self.by_recency.remove(&tick);
        }
    }

    /// The page with the oldest stamp, without evicting it.
    pub fn lru(&self) -> Option<u32> {
        self.by_recency.values().next().copied()
    }

    /// The page with the oldest stamp, evicting it from the tracked set.
    pub fn pop_lru(&mut self) -> Option<u32> {
        let (&tick, &page_id) = self.by_recency.iter().next()?;
        self.by_recency.remove(&tick);
        self.stamped.remove(&page_id);
        Some(page_id)
    }

    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.stamped.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.stamped.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_touch_is_evicted_first() {
        let mut cache = LruCache::new(3);

        cache.access(1);
        cache.access(2);
        cache.access(3);
        assert_eq!(cache.lru(), Some(1));

        cache.access(1);
        assert_eq!(cache.lru(), Some(2));

        assert_eq!(cache.pop_lru(), Some(2));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn explicit_remove_does_not_disturb_remaining_order() {
        let mut cache = LruCache::new(3);

        cache.access(1);
        cache.access(2);
        cache.access(3);

        cache.remove(2);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lru(), Some(1));

        cache.pop_lru();
        assert_eq!(cache.lru(), Some(3));
    }

    #[test]
    fn fresh_cache_has_nothing_to_evict() {
        let mut cache = LruCache::new(3);
        assert!(cache.is_empty());
        assert_eq!(cache.lru(), None);
        assert_eq!(cache.pop_lru(), None);
    }

    #[test]
    fn re_accessing_a_tracked_page_retires_its_old_stamp() {
        let mut cache = LruCache::new(2);
        cache.access(1);
        cache.access(1);
        // Only one live stamp for page 1 despite two accesses.
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.pop_lru(), Some(1));
        assert!(cache.is_empty());
    }
}
