//! Keyed lock table
//!
//! One mutex per record, created on demand and dropped from the table once
//! nobody holds or waits on it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};

/// Table of per-record locks keyed by (group, master key)
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Holds one record lock; released on drop, including early `?` returns
pub struct KeyLockGuard<'a> {
    owner: &'a KeyLocks,
    slot: String,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock for `group/key` is held
    pub fn lock(&self, group: &str, key: &str) -> KeyLockGuard<'_> {
        let slot = format!("{}/{}", group, key);

        // Clone the entry out so the table lock is not held while waiting
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(slot.clone()).or_default())
        };
        let guard = lock.lock_arc();

        KeyLockGuard {
            owner: self,
            slot,
            guard: Some(guard),
        }
    }

    /// Number of locks currently in the table
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();

        let mut locks = self.owner.locks.lock();
        if let Some(lock) = locks.get(&self.slot) {
            // Only the table's own handle is left
            if Arc::strong_count(lock) == 1 {
                locks.remove(&self.slot);
            }
        }
    }
}
