//! Per-fragment mutual exclusion.
//!
//! A fragment is two records, so an update or delete is a read-check-write
//! sequence across both ports. Sequences touching the same `(owner, id)`
//! run one at a time; different fragments never wait on each other.

use std::{collections::HashMap, sync::Arc};

use fragments_core::OwnerId;
use parking_lot::{Mutex, RawMutex};

type Key = (OwnerId, String);
type Slot = Arc<Mutex<()>>;

#[derive(Default)]
pub(crate) struct FragmentLocks {
    table: Mutex<HashMap<Key, Slot>>,
}

impl FragmentLocks {
    /// Block until no other guard for `(owner, id)` is alive.
    pub(crate) fn lock(&self, owner: &OwnerId, id: &str) -> FragmentGuard<'_> {
        let key = (owner.clone(), id.to_owned());
        let slot = Arc::clone(self.table.lock().entry(key.clone()).or_default());
        FragmentGuard {
            locks: self,
            key,
            held: Some(slot.lock_arc()),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table.lock().len()
    }
}

pub(crate) struct FragmentGuard<'a> {
    locks: &'a FragmentLocks,
    key: Key,
    held: Option<parking_lot::lock_api::ArcMutexGuard<RawMutex, ()>>,
}

impl Drop for FragmentGuard<'_> {
    fn drop(&mut self) {
        // Table lock first, so no new waiter can clone the slot between the
        // release and the count check.
        let mut table = self.locks.table.lock();
        drop(self.held.take());
        if table
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            table.remove(&self.key);
        }
    }
}
