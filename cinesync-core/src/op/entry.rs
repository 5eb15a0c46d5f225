//! Sliding-TTL entry cache with compare-and-delete.
//!
//! Values are wrapped in reference-counted entries whose expiry refreshes on
//! every access. Deletion compares against a previously returned handle so a
//! concurrent load cannot resurrect a value the caller is removing.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct Entry<V> {
    value: V,
    deadline_millis: AtomicI64,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl<V> Entry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            deadline_millis: AtomicI64::new(now_millis() + ttl.as_millis() as i64),
        }
    }

    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    #[must_use]
    pub fn expired(&self) -> bool {
        now_millis() > self.deadline_millis.load(Ordering::Acquire)
    }

    pub fn refresh(&self, ttl: Duration) {
        self.deadline_millis
            .store(now_millis() + ttl.as_millis() as i64, Ordering::Release);
    }
}

pub struct SyncCache<K, V>
where
    K: Eq + Hash + Clone,
{
    entries: DashMap<K, Arc<Entry<V>>>,
    ttl: Duration,
}

impl<K, V> SyncCache<K, V>
where
    K: Eq + Hash + Clone,
{
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Fetch a live entry, refreshing its expiry. Expired entries read as
    /// absent; the sweep removes them.
    #[must_use]
    pub fn load(&self, key: &K) -> Option<Arc<Entry<V>>> {
        let entry = self.entries.get(key)?.clone();
        if entry.expired() {
            return None;
        }
        entry.refresh(self.ttl);
        Some(entry)
    }

    /// Insert `value` unless a live entry exists; returns the resident entry
    /// and whether it was already present.
    pub fn load_or_store(&self, key: K, value: V) -> (Arc<Entry<V>>, bool) {
        if let Some(existing) = self.load(&key) {
            return (existing, true);
        }
        let fresh = Arc::new(Entry::new(value, self.ttl));
        let mut loaded = true;
        let entry = self
            .entries
            .entry(key)
            .and_modify(|existing| {
                if existing.expired() {
                    *existing = fresh.clone();
                    loaded = false;
                }
            })
            .or_insert_with(|| {
                loaded = false;
                fresh.clone()
            })
            .clone();
        entry.refresh(self.ttl);
        (entry, loaded)
    }

    /// Remove `key` only if it still maps to exactly `entry`.
    pub fn compare_and_delete(&self, key: &K, entry: &Arc<Entry<V>>) -> bool {
        self.entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    pub fn delete(&self, key: &K) -> Option<Arc<Entry<V>>> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Remove expired entries and hand them back for cleanup.
    pub fn sweep(&self) -> Vec<(K, Arc<Entry<V>>)> {
        let expired: Vec<(K, Arc<Entry<V>>)> = self
            .entries
            .iter()
            .filter(|kv| kv.value().expired())
            .map(|kv| (kv.key().clone(), kv.value().clone()))
            .collect();
        expired
            .into_iter()
            .filter(|(key, entry)| self.compare_and_delete(key, entry))
            .collect()
    }

    pub fn for_each(&self, mut f: impl FnMut(&K, &Arc<Entry<V>>)) {
        for kv in self.entries.iter() {
            f(kv.key(), kv.value());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
