//! Per-entity exclusive locks.
//!
//! One async mutex per key, created on first use and dropped again once no
//! holder or waiter remains. Release is tied to the guard, so every exit
//! path of the holder (including `?` returns and panics) unlocks.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct EntityLocks<K>
where
    K: Eq + Hash + Clone,
{
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K> EntityLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Wait until the lock for `key` is free and take it.
    pub async fn acquire(&self, key: K) -> EntityLockGuard<'_, K> {
        let mutex = self.slot(&key);
        let guard = mutex.lock_owned().await;
        EntityLockGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn try_acquire(&self, key: K) -> Option<EntityLockGuard<'_, K>> {
        let mutex = self.slot(&key);
        let guard = mutex.try_lock_owned().ok()?;
        Some(EntityLockGuard {
            locks: self,
            key,
            guard: Some(guard),
        })
    }

    /// Whether some holder currently owns the lock for `key`.
    pub fn is_locked(&self, key: &K) -> bool {
        self.locks
            .get(key)
            .is_some_and(|m| m.try_lock().is_err())
    }

    /// Number of keys with a live lock entry.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }

    fn slot(&self, key: &K) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl<K> Default for EntityLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Held lock on one entity. Dropping it releases the lock.
pub struct EntityLockGuard<'a, K>
where
    K: Eq + Hash + Clone,
{
    locks: &'a EntityLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for EntityLockGuard<'_, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        // Unlock first so the strong count reflects only the map and waiters.
        self.guard.take();
        self.locks
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
