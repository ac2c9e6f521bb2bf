//! Skala keyed store: a concurrent map with a per-key exclusive-lock
//! protocol for read-modify-write sequences.
//!
//! Two independent config streams and the reconciler all mutate the same
//! entities; per-key locking bounds contention to genuine conflicts on the
//! same identifier instead of serializing unrelated autoscalers behind one
//! global lock.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, RwLock};

use rustc_hash::FxHashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Concurrent keyed map. Cheap to clone; clones share the same data.
pub struct KeyedStore<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for KeyedStore<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct Inner<T> {
    data: RwLock<FxHashMap<String, T>>,
    // One slot per key participating in the lock protocol. Slots without
    // data are garbage-collected when the last guard drops.
    locks: Mutex<FxHashMap<String, Arc<AsyncMutex<()>>>>,
}

impl<T: Clone> Default for KeyedStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> KeyedStore<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                data: RwLock::new(FxHashMap::default()),
                locks: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    /// Copy of one entry, outside the per-key lock protocol.
    pub fn get(&self, key: &str) -> Option<T> {
        self.inner.data.read().unwrap().get(key).cloned()
    }

    /// Point-in-time snapshot of all entries. Read consistency is "recent",
    /// not linearizable: writers holding per-key locks are not waited for.
    pub fn get_all(&self) -> Vec<T> {
        self.inner.data.read().unwrap().values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.data.read().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.data.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.read().unwrap().is_empty()
    }

    /// Direct write outside the lock protocol (object-watch bootstrap and
    /// tests). `writer` is observability metadata only.
    pub fn set(&self, key: &str, value: T, writer: &str) {
        trace!(key, writer, "store set");
        self.inner.data.write().unwrap().insert(key.to_string(), value);
    }

    /// Hard removal of the entry and its lock slot, as opposed to the
    /// soft-delete flag carried inside the state. A writer still holding the
    /// key lock will recreate the entry on commit.
    pub fn remove(&self, key: &str, writer: &str) {
        trace!(key, writer, "store remove");
        self.inner.data.write().unwrap().remove(key);
        self.inner.locks.lock().unwrap().remove(key);
    }

    /// Acquire the exclusive lock for `key` if the key exists.
    ///
    /// Returns `None` when the key is absent; no lock is held in that case.
    /// Otherwise the guard holds the key lock until committed or dropped.
    pub async fn lock_entry(&self, key: &str) -> Option<StoreEntry<T>> {
        {
            // Fast path: no lock slot and no data means the key does not
            // exist at all; return without touching the lock protocol.
            let locks = self.inner.locks.lock().unwrap();
            if !locks.contains_key(key) && !self.inner.data.read().unwrap().contains_key(key) {
                return None;
            }
        }
        let slot = self.slot_for(key);
        let guard = slot.lock_owned().await;
        let value = self.inner.data.read().unwrap().get(key).cloned();
        if value.is_none() {
            // Deleted (or never committed) while we waited for the lock.
            drop(guard);
            self.inner.gc_slot(key);
            return None;
        }
        Some(StoreEntry {
            store: Arc::clone(&self.inner),
            key: key.to_string(),
            value,
            guard: Some(guard),
        })
    }

    /// Acquire the exclusive lock for `key`, taking it even when the key
    /// does not exist yet. `found()` on the guard tells which case applies;
    /// the caller is expected to populate and commit a fresh value when not
    /// found.
    pub async fn lock_entry_or_create(&self, key: &str) -> StoreEntry<T> {
        let slot = self.slot_for(key);
        let guard = slot.lock_owned().await;
        let value = self.inner.data.read().unwrap().get(key).cloned();
        StoreEntry {
            store: Arc::clone(&self.inner),
            key: key.to_string(),
            value,
            guard: Some(guard),
        }
    }

    /// Apply `f` to every entry, one per-key lock at a time. `f` returns
    /// true to persist its mutation.
    pub async fn update<F>(&self, mut f: F, writer: &str)
    where
        F: FnMut(&mut T) -> bool,
    {
        for key in self.keys() {
            if let Some(entry) = self.lock_entry(&key).await {
                let Some(mut value) = entry.cloned() else { continue };
                if f(&mut value) {
                    entry.commit(value, writer);
                }
            }
        }
    }

    fn slot_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.inner.locks.lock().unwrap();
        match locks.get(key) {
            Some(slot) => Arc::clone(slot),
            None => {
                let slot = Arc::new(AsyncMutex::new(()));
                locks.insert(key.to_string(), Arc::clone(&slot));
                slot
            }
        }
    }
}

impl<T> Inner<T> {
    // Drop the lock slot once nothing references it and no data backs it.
    fn gc_slot(&self, key: &str) {
        let mut locks = self.locks.lock().unwrap();
        let Some(slot) = locks.get(key) else { return };
        if Arc::strong_count(slot) == 1 && !self.data.read().unwrap().contains_key(key) {
            locks.remove(key);
        }
    }
}

/// Exclusive handle on one key of the store.
///
/// Holds the per-key lock; `commit` stores a new value and releases it.
/// Dropping the guard without committing also releases the lock and leaves
/// the map untouched, so no early-return path can leak a held lock.
pub struct StoreEntry<T: Clone> {
    store: Arc<Inner<T>>,
    key: String,
    value: Option<T>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<T: Clone> StoreEntry<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the key existed when the lock was taken.
    pub fn found(&self) -> bool {
        self.value.is_some()
    }

    /// The value read under the lock, if the key existed.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Copy of the value read under the lock.
    pub fn cloned(&self) -> Option<T> {
        self.value.clone()
    }

    /// Store `value` and release the key lock. `writer` is observability
    /// metadata only, not used for conflict resolution.
    pub fn commit(self, value: T, writer: &str) {
        trace!(key = %self.key, writer, "store commit");
        self.store.data.write().unwrap().insert(self.key.clone(), value);
        // Drop releases the lock.
    }
}

impl<T: Clone> Drop for StoreEntry<T> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
        }
        self.store.gc_slot(&self.key);
    }
}
