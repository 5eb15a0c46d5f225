//! Keyed family of [`RefreshCache`] entries.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use super::refresh::{InitFn, RefreshCache};

/// Map of per-key refresh caches sharing one TTL and initializer factory.
///
/// The factory runs outside the map lock; a raced insertion keeps the first
/// entry and discards the loser.
pub struct MapCache<K, T, A = ()>
where
    K: Eq + Hash + Clone,
{
    entries: DashMap<K, Arc<RefreshCache<T, A>>>,
    ttl: Option<Duration>,
    factory: Arc<dyn Fn(&K) -> InitFn<T, A> + Send + Sync>,
}

impl<K, T, A> MapCache<K, T, A>
where
    K: Eq + Hash + Clone,
    T: Clone + Send,
    A: Send + 'static,
{
    pub fn new<F>(ttl: Option<Duration>, factory: F) -> Self
    where
        F: Fn(&K) -> InitFn<T, A> + Send + Sync + 'static,
    {
        Self {
            entries: DashMap::new(),
            ttl,
            factory: Arc::new(factory),
        }
    }

    /// Get the entry for `key`, creating it from the factory if absent.
    pub fn load_or_store(&self, key: K) -> Arc<RefreshCache<T, A>> {
        if let Some(entry) = self.entries.get(&key) {
            return entry.clone();
        }
        let init = (self.factory)(&key);
        self.entries
            .entry(key)
            .or_insert_with(|| Arc::new(RefreshCache::from_init(init, self.ttl)))
            .clone()
    }

    pub fn remove(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Keep only the entries whose key satisfies the predicate.
    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) {
        self.entries.retain(|key, _| keep(key));
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
