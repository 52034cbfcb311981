//! Expiring LRU cache for upstream responses
//!
//! Bounded key/value store with per-entry TTL and least-recently-used
//! eviction. Recency rank is refreshed on `get`, not insertion order.
//! A background sweep removes expired entries between accesses so
//! worst-case memory stays bounded even without traffic.
//!
//! Each logical cache domain (geocoding, place search, enrichment)
//! owns its own instance with its own size and TTL policy.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

/// A cached value with expiry and recency metadata
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    last_accessed_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Cache domain name
    pub name: String,
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses (unknown key or expired entry)
    pub misses: u64,
    /// Total evictions (expiry or LRU displacement)
    pub evictions: u64,
    /// Current number of live entries
    pub size: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}

/// Thread-safe expiring LRU cache.
///
/// Operations never fail from the caller's perspective: a miss is
/// indistinguishable from "never cached", and the caller always falls
/// back to the underlying provider.
pub struct ExpiringCache<V> {
    name: String,
    max_entries: usize,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    stats: CacheStats,
}

impl<V: Clone> ExpiringCache<V> {
    /// Create a new cache holding at most `max_entries` live entries.
    #[must_use]
    pub fn new(name: impl Into<String>, max_entries: usize) -> Self {
        Self {
            name: name.into(),
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }

    /// Get a cached value if it exists and hasn't expired.
    ///
    /// A hit refreshes the entry's recency rank. An expired entry is
    /// removed as a side effect and counts as both a miss and an
    /// eviction.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                entry.last_accessed_at = now;
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a value under `key` with the given TTL.
    ///
    /// Overwriting an existing key never evicts. Inserting a new key
    /// into a full cache first evicts exactly one entry: the one with
    /// the globally oldest `last_accessed_at`.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            // Linear scan is fine at these sizes
            let lru_key = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed_at)
                .map(|(k, _)| k.clone());
            if let Some(lru_key) = lru_key {
                entries.remove(&lru_key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(cache = %self.name, key = %lru_key, "Evicted least recently used entry");
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
                last_accessed_at: now,
            },
        );
    }

    /// Whether a live (non-expired) entry exists for `key`.
    ///
    /// Does not refresh recency and does not count toward hit/miss stats.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Current number of entries, including any not yet swept.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Return `true` when the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStatsSnapshot {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        CacheStatsSnapshot {
            name: self.name.clone(),
            hits,
            misses,
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            size: self.entries.lock().len(),
            hit_rate,
        }
    }

    /// Remove every expired entry, independent of access patterns.
    ///
    /// Called by the background sweep task.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.len();
        drop(entries);

        if removed > 0 {
            self.stats
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(cache = %self.name, removed, "Swept expired cache entries");
        }
    }
}

/// A cache handle paired with its domain's TTL policy.
///
/// Providers hold one of these per domain so the TTL decision stays a
/// per-domain policy, not something each call site re-decides.
pub struct CacheDomain<V> {
    cache: Arc<ExpiringCache<V>>,
    ttl: Duration,
}

impl<V> Clone for CacheDomain<V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            ttl: self.ttl,
        }
    }
}

impl<V: Clone> CacheDomain<V> {
    /// Create a new domain with its own instance.
    #[must_use]
    pub fn new(name: impl Into<String>, max_entries: usize, ttl: Duration) -> Self {
        Self {
            cache: Arc::new(ExpiringCache::new(name, max_entries)),
            ttl,
        }
    }

    /// Get a cached value.
    pub fn get(&self, key: &str) -> Option<V> {
        self.cache.get(key)
    }

    /// Store a value under the domain's TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.cache.set(key, value, self.ttl);
    }

    /// The underlying cache instance (for stats and sweeping).
    #[must_use]
    pub fn cache(&self) -> &Arc<ExpiringCache<V>> {
        &self.cache
    }
}

/// Spawn a background tokio task that periodically sweeps expired
/// entries from `cache`.
///
/// The task runs every `interval` and stops when the `Arc` reference
/// count drops to 1 (all other owners have dropped their handles).
pub fn spawn_sweep_task<V>(cache: Arc<ExpiringCache<V>>, interval: Duration)
where
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if Arc::strong_count(&cache) <= 1 {
                break;
            }
            cache.evict_expired();
        }
    });
}
