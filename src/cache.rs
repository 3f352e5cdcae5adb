//! Single-flight memoizing cache shared by every lookup in the engine.
//!
//! Each key maps to a slot that is filled at most once. Concurrent `get`s
//! for the same key wait on the same slot, so only one loader runs. An
//! `invalidate` detaches the slot: loads already in flight finish into the
//! detached slot and later callers start a fresh one.

use lru::LruCache;
use parking_lot::Mutex;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct MemoCache<K, V> {
    slots: Mutex<LruCache<K, Arc<OnceCell<V>>>>,
}

impl<K, V> MemoCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            slots: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return the cached value for `key`, running `loader` on a miss.
    /// A failed load leaves the slot empty; the next caller retries.
    pub async fn get<F, Fut, E>(&self, key: K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            match slots.get(&key) {
                Some(slot) => slot.clone(),
                None => {
                    let slot = Arc::new(OnceCell::new());
                    slots.put(key, slot.clone());
                    slot
                }
            }
        };
        let value = slot.get_or_try_init(loader).await?;
        Ok(value.clone())
    }

    /// Drop the entry for `key`. Invalidating an absent key is a no-op.
    pub fn invalidate(&self, key: &K) {
        self.slots.lock().pop(key);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
