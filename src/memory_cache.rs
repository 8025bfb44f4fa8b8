//! A [MemoryCache] is a fixed-capacity map which evicts the least recently used entry when full.
//!
//! Capacity is counted in entries, not cost: the intended payloads are decoded images, of which there are tens or
//! hundreds.  At that size an O(n) scan for the oldest entry is cheaper than keeping a linked list in order, so the
//! cache is a plain hash map plus a logical clock.  Every insert and read advances the clock, which means no two
//! entries ever share a last-access tick and eviction order is fully deterministic.
//!
//! Inserting a key which is already present does nothing: the first writer wins and the existing entry is not
//! refreshed.
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use ahash::RandomState;

use crate::cache_entry::CacheEntry;

pub struct MemoryCache<K: Hash + Eq, V> {
    entries: HashMap<K, CacheEntry<V>, RandomState>,
    max_entries: usize,
    clock: u64,
}

impl<K: Hash + Eq + Clone, V> MemoryCache<K, V> {
    /// Create a cache holding at most `max_entries` items.  Zero is treated as one.
    pub fn new(max_entries: usize) -> MemoryCache<K, V> {
        MemoryCache {
            entries: Default::default(),
            max_entries: max_entries.max(1),
            clock: 0,
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Change the capacity.  This never evicts by itself; it only affects later inserts.
    pub fn set_max_entries(&mut self, max_entries: usize) {
        self.max_entries = max_entries.max(1);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn exists<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Get an item, marking it as the most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.tick();
        self.entries.get_mut(key).map(|e| e.touch(now))
    }

    /// How many times an entry has been inserted or read, if present.
    pub fn use_count<Q>(&self, key: &Q) -> Option<u64>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|e| e.use_count())
    }

    /// The key which would be evicted by the next insert into a full cache.
    fn find_item_to_evict(&self) -> Option<K> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| e.last_access())
            .map(|(k, _)| k.clone())
    }

    /// Add an entry to the cache, unless the key is already present.
    ///
    /// If the cache is full, exactly one entry is evicted first and its key is returned.
    pub fn insert(&mut self, key: K, value: Arc<V>) -> Option<K> {
        if self.entries.contains_key(&key) {
            return None;
        }

        let evicted = if self.entries.len() >= self.max_entries {
            let out = self.find_item_to_evict();
            if let Some(ref k) = out {
                self.entries.remove(k);
            }
            out
        } else {
            None
        };

        let now = self.tick();
        self.entries.insert(key, CacheEntry::new(value, now));
        evicted
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).map(CacheEntry::into_item)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Keys currently in the cache, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }
}
