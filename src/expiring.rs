//! TTL key-value store for short-lived tokens such as invite codes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

pub struct ExpiringMap<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (V, Instant)>>,
}

impl<K, V> ExpiringMap<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or replace `key`; the TTL restarts from now.
    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.lock();
        purge_expired(&mut entries);
        entries.insert(key, (value, Instant::now() + self.ttl));
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        purge_expired(&mut entries);
        entries.get(key).map(|(v, _)| v.clone())
    }

    /// Remove and return a live entry. Expired entries yield `None`.
    pub fn take(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        purge_expired(&mut entries);
        entries.remove(key).map(|(v, _)| v)
    }

    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        purge_expired(&mut entries);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn purge_expired<K, V>(entries: &mut HashMap<K, (V, Instant)>) {
    let now = Instant::now();
    entries.retain(|_, (_, deadline)| *deadline > now);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let map = ExpiringMap::new(Duration::from_secs(60));
        map.insert(1u32, "a");
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(map.get(&1), Some("a"));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(map.get(&1), None);
        assert!(map.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn take_is_single_use() {
        let map = ExpiringMap::new(Duration::from_secs(60));
        map.insert(7u32, 70u64);
        assert!(map.contains(&7));
        assert_eq!(map.take(&7), Some(70));
        assert_eq!(map.take(&7), None);
    }

    #[tokio::test(start_paused = true)]
    async fn reinsert_restarts_ttl() {
        let map = ExpiringMap::new(Duration::from_secs(10));
        map.insert(1u8, 1u8);
        tokio::time::advance(Duration::from_secs(8)).await;
        map.insert(1, 2);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(map.get(&1), Some(2));
        assert_eq!(map.len(), 1);
    }
}
