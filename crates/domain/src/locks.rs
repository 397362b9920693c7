//! Per-key async mutual exclusion.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Idle entries are swept once the map grows past this size.
const SWEEP_THRESHOLD: usize = 1024;

/// A set of async mutexes addressed by key.
///
/// Holders of different keys never wait on each other; holders of the same
/// key are serialized in arrival order.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty lock set.
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for exclusive access to `key`.
    ///
    /// Access is held until the returned guard is dropped.
    pub async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() >= SWEEP_THRESHOLD {
                // Only the map holds a reference to idle locks.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(
                locks
                    .entry(key)
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Returns true if `key` is currently held.
    pub async fn is_held(&self, key: &K) -> bool {
        let locks = self.locks.lock().await;
        locks.get(key).is_some_and(|lock| lock.try_lock().is_err())
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
