use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::models::{AggregationResult, CacheKey};

struct CacheEntry {
    result: AggregationResult,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// TTL cache of aggregation results keyed by `(dex, chain)`.
///
/// Expired entries are evicted lazily on lookup. Concurrent misses on one key
/// wait for a single compute; misses on different keys never wait on each other.
pub struct PoolCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    inflight: DashMap<CacheKey, Arc<Mutex<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PoolCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            inflight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Unexpired entry for `key`, flagged `cached = true`. Drops it if expired.
    pub fn get(&self, key: &CacheKey) -> Option<AggregationResult> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => {
                    let mut result = entry.result.clone();
                    result.cached = true;
                    return Some(result);
                }
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
            tracing::debug!("🧹 Evicted expired entry {}/{}", key.dex, key.chain);
        }
        None
    }

    /// Store a result if it is cacheable. Returns whether it was stored.
    pub fn insert(&self, key: CacheKey, result: &AggregationResult, ttl: Duration) -> bool {
        if !result.is_cacheable() {
            return false;
        }

        let mut stored = result.clone();
        stored.cached = false;
        self.entries.write().insert(
            key,
            CacheEntry {
                result: stored,
                expires_at: Instant::now() + ttl,
            },
        );
        true
    }

    pub async fn get_or_compute<F, Fut>(&self, key: CacheKey, ttl: Duration, compute: F) -> AggregationResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AggregationResult>,
    {
        if let Some(hit) = self.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return hit;
        }

        let lock = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another request may have filled the entry while we waited.
        if let Some(hit) = self.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            drop(_guard);
            self.inflight.remove_if(&key, |_, current| Arc::ptr_eq(current, &lock));
            return hit;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let mut result = compute().await;
        result.cached = false;

        if self.insert(key.clone(), &result, ttl) {
            tracing::debug!("Cached {} pools for {}/{} ({}s)", result.len(), key.dex, key.chain, ttl.as_secs());
        } else {
            tracing::debug!("Not caching {} result for {}/{}", result.source, key.dex, key.chain);
        }

        self.inflight.remove_if(&key, |_, current| Arc::ptr_eq(current, &lock));
        result
    }

    /// Drop every entry immediately.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        tracing::info!("🧹 Cache cleared ({} entries)", removed);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for PoolCache {
    fn default() -> Self {
        Self::new()
    }
}
