// =============================================================================
// Generic TTL cache — hot/warm tier storage for the data facade
// =============================================================================
//
// Same shape as an instrument metadata cache: a keyed map of entries each
// stamped with `inserted_at`, hit/stale counters for observability, and
// `_at`-suffixed methods that take an explicit `Instant` so tests get
// deterministic control over freshness without sleeping.
// =============================================================================

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// A single cached value plus the instant it was inserted.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Outcome of a cache lookup, carrying the age so callers can feed it into
/// the freshness penalty without a second clock read.
#[derive(Debug, Clone)]
pub struct CacheLookup<V> {
    pub value: V,
    pub age: Duration,
    pub stale: bool,
}

/// Generic keyed TTL cache. One instance per tier (hot/warm) per facade.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    ttl: Duration,
    hits_total: u64,
    misses_total: u64,
    stale_total: u64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            hits_total: 0,
            misses_total: 0,
            stale_total: 0,
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn insert_at(&mut self, key: K, value: V, now: Instant) {
        self.entries.insert(key, CacheEntry { value, inserted_at: now });
    }

    /// Look up `key`, returning `None` on a cache miss, or `Some` with the
    /// cached value and whether it has exceeded the TTL. A stale hit is
    /// still returned (so callers can use it as a degraded fallback) but
    /// flagged so the caller can decide whether to trigger a refresh.
    pub fn get(&mut self, key: &K) -> Option<CacheLookup<V>> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&mut self, key: &K, now: Instant) -> Option<CacheLookup<V>> {
        self.get_at_with_ttl(key, now, self.ttl)
    }

    /// Same as `get_at` but checks staleness against `ttl` instead of the
    /// cache's own TTL, for callers that extend the effective TTL per entry
    /// (e.g. doubling it while the source venue is health-degraded).
    pub fn get_at_with_ttl(&mut self, key: &K, now: Instant, ttl: Duration) -> Option<CacheLookup<V>> {
        let entry = self.entries.get(key)?;
        let age = now.saturating_duration_since(entry.inserted_at);
        let stale = age > ttl;

        if stale {
            self.stale_total += 1;
        } else {
            self.hits_total += 1;
        }

        Some(CacheLookup { value: entry.value.clone(), age, stale })
    }

    /// Read a value and its age without affecting hit/stale/miss counters or
    /// checking it against any TTL. Used when the caller needs to inspect an
    /// entry (e.g. its stored venue) before deciding the effective TTL.
    pub fn peek_at(&self, key: &K, now: Instant) -> Option<(V, Duration)> {
        let entry = self.entries.get(key)?;
        let age = now.saturating_duration_since(entry.inserted_at);
        Some((entry.value.clone(), age))
    }

    pub fn record_miss(&mut self) {
        self.misses_total += 1;
    }

    pub fn hits_total(&self) -> u64 {
        self.hits_total
    }

    pub fn stale_total(&self) -> u64 {
        self.stale_total
    }

    pub fn misses_total(&self) -> u64 {
        self.misses_total
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evict_expired_at(&mut self, now: Instant, grace: Duration) {
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted_at) <= self.ttl + grace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_on_empty_cache() {
        let mut cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(10));
        assert!(cache.get(&"a".to_string()).is_none());
    }

    #[test]
    fn hit_before_ttl_elapsed() {
        let mut cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert_at("a".to_string(), 42, t0);
        let lookup = cache.get_at(&"a".to_string(), t0 + Duration::from_secs(5)).unwrap();
        assert_eq!(lookup.value, 42);
        assert!(!lookup.stale);
        assert_eq!(cache.hits_total(), 1);
    }

    #[test]
    fn stale_after_ttl_elapsed() {
        let mut cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert_at("a".to_string(), 42, t0);
        let lookup = cache.get_at(&"a".to_string(), t0 + Duration::from_secs(11)).unwrap();
        assert!(lookup.stale);
        assert_eq!(cache.stale_total(), 1);
    }

    #[test]
    fn ttl_override_extends_freshness_window() {
        let mut cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert_at("a".to_string(), 42, t0);
        let stale_at_base = cache.get_at(&"a".to_string(), t0 + Duration::from_secs(15)).unwrap();
        assert!(stale_at_base.stale);

        let fresh_with_override = cache
            .get_at_with_ttl(&"a".to_string(), t0 + Duration::from_secs(15), Duration::from_secs(20))
            .unwrap();
        assert!(!fresh_with_override.stale);
    }

    #[test]
    fn peek_ignores_ttl_and_counters() {
        let cache: TtlCache<String, i32> = {
            let mut c = TtlCache::new(Duration::from_secs(1));
            c.insert_at("a".to_string(), 7, Instant::now() - Duration::from_secs(100));
            c
        };
        let (value, age) = cache.peek_at(&"a".to_string(), Instant::now()).unwrap();
        assert_eq!(value, 7);
        assert!(age >= Duration::from_secs(99));
        assert_eq!(cache.hits_total(), 0);
        assert_eq!(cache.stale_total(), 0);
    }

    #[test]
    fn eviction_respects_grace_period() {
        let mut cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert_at("a".to_string(), 1, t0);
        cache.evict_expired_at(t0 + Duration::from_secs(15), Duration::from_secs(10));
        assert_eq!(cache.len(), 1, "within grace period, entry should survive");
        cache.evict_expired_at(t0 + Duration::from_secs(25), Duration::from_secs(10));
        assert_eq!(cache.len(), 0, "past grace period, entry should be evicted");
    }
}
