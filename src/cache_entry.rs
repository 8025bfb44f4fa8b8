//! An internal cache cell, which holds an item and records how often and when it was last used.
use std::sync::Arc;

pub(crate) struct CacheEntry<T> {
    item: Arc<T>,
    use_count: u64,
    /// Tick of the owning cache's logical clock at the last insert or read.
    last_access: u64,
}

impl<T> CacheEntry<T> {
    pub(crate) fn new(item: Arc<T>, now: u64) -> CacheEntry<T> {
        CacheEntry {
            item,
            use_count: 1,
            last_access: now,
        }
    }

    /// read the item, making it used and returning a reference to the contents.
    pub(crate) fn touch(&mut self, now: u64) -> Arc<T> {
        self.use_count += 1;
        self.last_access = now;
        self.item.clone()
    }

    pub(crate) fn into_item(self) -> Arc<T> {
        self.item
    }

    pub(crate) fn use_count(&self) -> u64 {
        self.use_count
    }

    pub(crate) fn last_access(&self) -> u64 {
        self.last_access
    }
}
