//! The set of keys which currently have a job on the persistence/network path.
//!
//! At most one job per key holds an [ActiveGuard] at a time; any other job for the same key blocks in
//! [ActiveRequests::acquire] until the guard is dropped, then takes it over and re-checks the memory cache itself.
use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};

use ahash::RandomState;

use crate::*;

#[derive(Default)]
pub(crate) struct ActiveRequests {
    keys: Mutex<HashSet<ResourceKey, RandomState>>,
    released: Condvar,
}

/// Holds a key in the active set.  Dropping it, on any path including unwinding, releases the key and wakes every
/// waiter.
pub(crate) struct ActiveGuard<'a> {
    set: &'a ActiveRequests,
    key: ResourceKey,
}

impl ActiveRequests {
    /// Block until no other job holds `key`, then take it.
    pub(crate) fn acquire(&self, key: &ResourceKey) -> ActiveGuard<'_> {
        let mut keys = self.keys.lock().unwrap();
        while keys.contains(key) {
            log::debug!("Waiting on in-flight request for {}", key);
            keys = self.released.wait(keys).unwrap();
        }
        keys.insert(key.clone());

        ActiveGuard {
            set: self,
            key: key.clone(),
        }
    }

    pub(crate) fn contains(&self, key: &ResourceKey) -> bool {
        self.keys.lock().unwrap().contains(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.lock().unwrap().len()
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        // This may run while unwinding, so a poisoned lock mustn't turn into a second panic.
        let mut keys = self
            .set
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        keys.remove(&self.key);
        self.set.released.notify_all();
    }
}
