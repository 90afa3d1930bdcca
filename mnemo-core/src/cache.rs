//! Generic bounded TTL cache with hit/miss statistics.
//!
//! Front-ends the shards three times over in the manager: records by id,
//! per-user id lists, and conflict resolutions by fingerprint. Caches are
//! best-effort, not authoritative — the shard is the source of truth, and
//! callers must always be able to fall through to it.
//!
//! Capacity eviction is delegated to [`lru::LruCache`]; expiry is enforced
//! lazily on `get` and in bulk via [`TtlCache::purge_expired`], which the
//! manager's sweep task calls. Hit/miss counters are atomics so `stats()`
//! reads never contend with the map lock.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// One cached value with its expiry bookkeeping.
///
/// Last-use recency is tracked by the LRU order itself.
struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// A bounded key→value cache where entries expire after a fixed TTL.
pub struct TtlCache<K: Hash + Eq, V> {
    map: Mutex<lru::LruCache<K, Entry<V>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    shut_down: AtomicBool,
}

/// Statistics snapshot for one cache instance.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing, or found an expired entry.
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0.0 before any lookup.
    pub hit_rate: f64,
    /// Current number of entries (live and not-yet-purged expired).
    pub size: usize,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    /// Create a cache holding at most `capacity` entries, each living `ttl`.
    ///
    /// A zero capacity is clamped to one entry.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            map: Mutex::new(lru::LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Look up `key`. Misses on absence, expiry, or after shutdown.
    ///
    /// Expired entries are dropped on the way out.
    pub fn get(&self, key: &K) -> Option<V> {
        if self.shut_down.load(Ordering::Acquire) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let mut map = self.map.lock();
        let expired = match map.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                let value = entry.value.clone();
                drop(map);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            map.pop(key);
        }
        drop(map);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or overwrite `key`. Overwriting resets the TTL.
    ///
    /// No-op after shutdown. May evict the least-recently-used entry.
    pub fn put(&self, key: K, value: V) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        self.map.lock().put(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove `key`. Idempotent no-op if absent.
    pub fn remove(&self, key: &K) {
        self.map.lock().pop(key);
    }

    /// Drop every expired entry. Returns the number removed.
    ///
    /// Called from the manager's background sweep; holds the map lock for one
    /// bounded pass, so foreground `get`/`put` are only briefly blocked.
    pub fn purge_expired(&self) -> usize {
        let mut map = self.map.lock();
        let expired: Vec<K> = map
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() > self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            map.pop(key);
        }
        expired.len()
    }

    /// Snapshot hit/miss statistics and current size.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            size: self.map.lock().len(),
        }
    }

    /// Stop accepting entries and clear the cache. Idempotent.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        self.map.lock().clear();
    }
}
