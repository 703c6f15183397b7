//! Process-lifetime memoization of remote lookups
//!
//! Entries are keyed by the operation name plus the exact arguments and are
//! never evicted or invalidated. A repeated key returns the stored value even
//! if the remote dataset has changed since; callers accept that staleness in
//! exchange for not repeating identical searches.

use cached::{Cached, UnboundCache};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    operation: &'static str,
    args: String,
}

impl CacheKey {
    pub fn new(operation: &'static str, args: &impl Debug) -> Self {
        Self {
            operation,
            args: format!("{:?}", args),
        }
    }
}

pub struct QueryCache<V> {
    entries: Mutex<UnboundCache<CacheKey, V>>,
}

impl<V: Clone> Default for QueryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> QueryCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(UnboundCache::new()),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.cache_get(key).cloned()
    }

    pub fn insert(&self, key: CacheKey, value: V) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.cache_set(key, value);
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.cache_size()
    }

    /// Return the stored value for `key`, or run `compute` and store its result
    /// when `keep` accepts it. The lock is not held while `compute` runs.
    pub async fn get_or_compute<F, Fut>(&self, key: CacheKey, compute: F, keep: impl Fn(&V) -> bool) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        if let Some(hit) = self.get(&key) {
            debug!("Cache hit for {}", key.operation);
            return hit;
        }

        let value = compute().await;
        if keep(&value) {
            let operation = key.operation;
            self.insert(key, value.clone());
            debug!("Cached {} result ({} entries)", operation, self.len());
        } else {
            debug!("Not caching {} result", key.operation);
        }
        value
    }
}
