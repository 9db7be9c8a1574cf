// =============================================================================
// Data facade — hot/warm/cold tier unification over the venue adapters
// =============================================================================
//
// `DataFacade` is composed the way `AppState` composes its subsystems: one
// struct holding shared, lock-protected state plus the venue adapters and
// health tracker it coordinates. Callers ask for bars or a book; the facade
// decides hot cache vs warm cache vs a live venue fetch vs falling back to
// the next healthy venue in the cascade, and always returns an `Attribution`
// so the caller knows exactly where the data came from.
// =============================================================================

pub mod cache;
pub mod freshness;
pub mod pit;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{instrument, info, warn};

use crate::errors::FacadeError;
use crate::health::VenueHealthTracker;
use crate::types::{Attribution, Bar, DataTier, HealthStatus, OrderBook, Symbol, Venue, VenueHealth};
use crate::venues::VenueAdapter;

use cache::{CacheLookup, TtlCache};
use pit::PitStore;

/// Key for the bar cache: (symbol, interval in seconds).
type BarKey = (Symbol, u64);

pub struct DataFacade {
    adapters: HashMap<Venue, Arc<dyn VenueAdapter>>,
    health: Arc<VenueHealthTracker>,
    /// Cached alongside the venue that served them, so TTL-doubling on a
    /// degraded venue can be applied per entry rather than cache-wide.
    hot_bars: Mutex<TtlCache<BarKey, (Vec<Bar>, Venue)>>,
    warm_bars: Mutex<TtlCache<BarKey, (Vec<Bar>, Venue)>>,
    hot_books: Mutex<TtlCache<Symbol, OrderBook>>,
    min_bars_required: usize,
    hot_ttl: Duration,
    warm_ttl: Duration,
    freshness_soft_start_s: f64,
    freshness_tau_s: f64,
    freshness_hard_limit_s: f64,
    /// Write-through audit log of every live fetch. `PitStore` only supports
    /// exact-`ts_ms` reads, so it cannot serve as a live fallback tier — it
    /// is never consulted on the read path, only appended to on success.
    cold: Option<PitStore>,
}

impl DataFacade {
    pub fn new(
        adapters: HashMap<Venue, Arc<dyn VenueAdapter>>,
        health: Arc<VenueHealthTracker>,
        hot_ttl: Duration,
        warm_ttl: Duration,
    ) -> Self {
        Self {
            adapters,
            health,
            hot_bars: Mutex::new(TtlCache::new(hot_ttl)),
            warm_bars: Mutex::new(TtlCache::new(warm_ttl)),
            hot_books: Mutex::new(TtlCache::new(hot_ttl)),
            min_bars_required: 20,
            hot_ttl,
            warm_ttl,
            freshness_soft_start_s: 8.0,
            freshness_tau_s: 30.0,
            freshness_hard_limit_s: 90.0,
            cold: None,
        }
    }

    /// Override the worst-feed-wins freshness curve (spec §4.2). Defaults
    /// match the ones exercised in `freshness::tests`.
    pub fn with_freshness_params(mut self, soft_start_s: f64, tau_s: f64, hard_limit_s: f64) -> Self {
        self.freshness_soft_start_s = soft_start_s;
        self.freshness_tau_s = tau_s;
        self.freshness_hard_limit_s = hard_limit_s;
        self
    }

    /// Attach a cold-tier audit log. Every successful live bar fetch is
    /// written through to it; it is never read from during a scan.
    pub fn with_cold_tier(mut self, pit: PitStore) -> Self {
        self.cold = Some(pit);
        self
    }

    /// Current health snapshot for `venue`, exposed so the orchestrator can
    /// read venue p99 latency for the late-fill guard's grace eligibility.
    pub fn health_status(&self, venue: Venue) -> VenueHealth {
        self.health.status(venue)
    }

    /// Double the base TTL while the source venue reads Yellow, so a
    /// halved-size-recommendation venue doesn't also force a refetch on
    /// every call. Logged once per decision so the doubling is observable.
    fn effective_ttl(&self, base: Duration, venue: Venue) -> Duration {
        if self.health.status(venue).status == HealthStatus::Yellow {
            info!(venue = %venue, base_ttl_s = base.as_secs_f64(), "venue degraded (yellow), doubling cache TTL");
            base * 2
        } else {
            base
        }
    }

    fn confidence_for(&self, age: Duration) -> f64 {
        freshness::freshness_penalty(
            age.as_secs_f64(),
            self.freshness_soft_start_s,
            self.freshness_tau_s,
            self.freshness_hard_limit_s,
        )
    }

    /// Look up `key` in `cache`, applying the venue-aware effective TTL for
    /// the entry found (if any) rather than the cache's own fixed TTL.
    fn lookup_bars_tier(
        &self,
        cache: &Mutex<TtlCache<BarKey, (Vec<Bar>, Venue)>>,
        key: &BarKey,
        base_ttl: Duration,
        now: Instant,
    ) -> Option<CacheLookup<(Vec<Bar>, Venue)>> {
        let mut guard = cache.lock();
        let (_, venue) = guard.peek_at(key, now)?.0;
        let ttl = self.effective_ttl(base_ttl, venue);
        guard.get_at_with_ttl(key, now, ttl)
    }

    /// Fetch bars for `symbol`, preferring the hot cache, then warm cache,
    /// then a live venue call walking the fallback cascade.
    #[instrument(skip(self), fields(symbol = %symbol))]
    pub async fn get_bars(
        &self,
        symbol: &Symbol,
        interval_s: u64,
        limit: u32,
    ) -> Result<(Vec<Bar>, Attribution), FacadeError> {
        let key: BarKey = (symbol.clone(), interval_s);
        let now = Instant::now();
        let now_ms = chrono::Utc::now().timestamp_millis();

        if let Some(lookup) = self.lookup_bars_tier(&self.hot_bars, &key, self.hot_ttl, now) {
            if !lookup.stale {
                let (bars, venue) = lookup.value;
                return Ok((
                    bars,
                    Attribution {
                        venue,
                        ts_ms: now_ms,
                        fetched_at_ms: now_ms,
                        cache_hit: true,
                        tier: DataTier::Hot,
                        fallback_from: None,
                        confidence: self.confidence_for(lookup.age),
                    },
                ));
            }
        }

        if let Some(lookup) = self.lookup_bars_tier(&self.warm_bars, &key, self.warm_ttl, now) {
            if !lookup.stale {
                let (bars, venue) = lookup.value;
                return Ok((
                    bars,
                    Attribution {
                        venue,
                        ts_ms: now_ms,
                        fetched_at_ms: now_ms,
                        cache_hit: true,
                        tier: DataTier::Warm,
                        fallback_from: None,
                        confidence: self.confidence_for(lookup.age),
                    },
                ));
            }
        }

        self.fetch_bars_live(symbol, interval_s, limit).await
    }

    async fn fetch_bars_live(
        &self,
        symbol: &Symbol,
        interval_s: u64,
        limit: u32,
    ) -> Result<(Vec<Bar>, Attribution), FacadeError> {
        let mut attempted_from: Option<Venue> = None;

        let mut venue = self.health.first_healthy().ok_or_else(|| FacadeError::NoHealthyVenue {
            symbol: symbol.to_string(),
        })?;

        loop {
            let adapter = self.adapters.get(&venue).ok_or_else(|| FacadeError::NoHealthyVenue {
                symbol: symbol.to_string(),
            })?;

            let start = std::time::Instant::now();
            match adapter.get_klines(symbol, interval_s, limit).await {
                Ok(bars) => {
                    self.health.record_success(venue, start.elapsed().as_millis() as f64);

                    if bars.len() < self.min_bars_required {
                        return Err(FacadeError::InsufficientData {
                            symbol: symbol.to_string(),
                            have: bars.len(),
                            need: self.min_bars_required,
                        });
                    }

                    let key: BarKey = (symbol.clone(), interval_s);
                    self.hot_bars.lock().insert(key.clone(), (bars.clone(), venue));
                    self.warm_bars.lock().insert(key, (bars.clone(), venue));

                    let now_ms = chrono::Utc::now().timestamp_millis();
                    if let Some(cold) = &self.cold {
                        if let Err(e) = cold.write(symbol, now_ms, bars.len(), &bars) {
                            warn!(symbol = %symbol, error = %e, "failed to write PIT audit snapshot");
                        }
                    }

                    return Ok((
                        bars,
                        Attribution {
                            venue,
                            ts_ms: now_ms,
                            fetched_at_ms: now_ms,
                            cache_hit: false,
                            tier: DataTier::Hot,
                            fallback_from: attempted_from,
                            confidence: self.confidence_for(Duration::ZERO),
                        },
                    ));
                }
                Err(e) => {
                    warn!(venue = %venue, symbol = %symbol, error = %e, "venue fetch failed, trying cascade");
                    self.health.record_error(venue);
                    attempted_from.get_or_insert(venue);

                    match self.health.next_healthy_after(venue) {
                        Some(next) => venue = next,
                        None => {
                            return Err(FacadeError::NoHealthyVenue { symbol: symbol.to_string() })
                        }
                    }
                }
            }
        }
    }

    /// Fetch an order-book snapshot, same cascade semantics as `get_bars`.
    #[instrument(skip(self), fields(symbol = %symbol))]
    pub async fn get_order_book(
        &self,
        symbol: &Symbol,
        depth: u32,
    ) -> Result<(OrderBook, Attribution), FacadeError> {
        let now = Instant::now();

        let hot_lookup = {
            let mut guard = self.hot_books.lock();
            match guard.peek_at(symbol, now) {
                Some((book, _)) => {
                    let ttl = self.effective_ttl(self.hot_ttl, book.venue);
                    guard.get_at_with_ttl(symbol, now, ttl)
                }
                None => None,
            }
        };

        if let Some(lookup) = hot_lookup {
            if !lookup.stale {
                let now_ms = chrono::Utc::now().timestamp_millis();
                return Ok((
                    lookup.value.clone(),
                    Attribution {
                        venue: lookup.value.venue,
                        ts_ms: now_ms,
                        fetched_at_ms: now_ms,
                        cache_hit: true,
                        tier: DataTier::Hot,
                        fallback_from: None,
                        confidence: self.confidence_for(lookup.age),
                    },
                ));
            }
        }

        let mut attempted_from: Option<Venue> = None;
        let mut venue = self.health.first_healthy().ok_or_else(|| FacadeError::NoHealthyVenue {
            symbol: symbol.to_string(),
        })?;

        loop {
            let adapter = self.adapters.get(&venue).ok_or_else(|| FacadeError::NoHealthyVenue {
                symbol: symbol.to_string(),
            })?;

            let start = std::time::Instant::now();
            match adapter.get_order_book(symbol, depth).await {
                Ok(book) => {
                    self.health.record_success(venue, start.elapsed().as_millis() as f64);
                    self.hot_books.lock().insert(symbol.clone(), book.clone());

                    let now_ms = chrono::Utc::now().timestamp_millis();
                    return Ok((
                        book,
                        Attribution {
                            venue,
                            ts_ms: now_ms,
                            fetched_at_ms: now_ms,
                            cache_hit: false,
                            tier: DataTier::Hot,
                            fallback_from: attempted_from,
                            confidence: self.confidence_for(Duration::ZERO),
                        },
                    ));
                }
                Err(e) => {
                    warn!(venue = %venue, symbol = %symbol, error = %e, "book fetch failed, trying cascade");
                    self.health.record_error(venue);
                    attempted_from.get_or_insert(venue);

                    match self.health.next_healthy_after(venue) {
                        Some(next) => venue = next,
                        None => {
                            return Err(FacadeError::NoHealthyVenue { symbol: symbol.to_string() })
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::VenueError;
    use crate::types::{PriceLevel, Venue};
    use async_trait::async_trait;

    struct FlakyAdapter {
        venue: Venue,
        fail: bool,
    }

    #[async_trait]
    impl VenueAdapter for FlakyAdapter {
        fn venue(&self) -> Venue {
            self.venue
        }

        async fn get_klines(&self, _s: &Symbol, _i: u64, limit: u32) -> Result<Vec<Bar>, VenueError> {
            if self.fail {
                return Err(VenueError::VenueUnavailable {
                    venue: self.venue.to_string(),
                    reason: "forced failure".to_string(),
                });
            }
            Ok((0..limit.max(25))
                .map(|i| Bar {
                    ts_open_ms: i as i64,
                    ts_close_ms: i as i64 + 1,
                    o: 1.0,
                    h: 1.0,
                    l: 1.0,
                    c: 1.0,
                    volume: 1.0,
                })
                .collect())
        }

        async fn get_order_book(&self, symbol: &Symbol, _d: u32) -> Result<OrderBook, VenueError> {
            Ok(OrderBook {
                venue: self.venue,
                symbol: symbol.clone(),
                ts_ms: 0,
                seq: 1,
                bids: vec![PriceLevel { price: 99.0, size: 1.0 }],
                asks: vec![PriceLevel { price: 100.0, size: 1.0 }],
            })
        }

        async fn ping(&self) -> Result<(), VenueError> {
            Ok(())
        }
    }

    fn build_facade(kraken_fails: bool) -> DataFacade {
        let health = Arc::new(VenueHealthTracker::new());
        let mut adapters: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
        adapters.insert(Venue::Kraken, Arc::new(FlakyAdapter { venue: Venue::Kraken, fail: kraken_fails }));
        adapters.insert(Venue::Okx, Arc::new(FlakyAdapter { venue: Venue::Okx, fail: false }));
        adapters.insert(Venue::Coinbase, Arc::new(FlakyAdapter { venue: Venue::Coinbase, fail: false }));
        adapters.insert(Venue::Binance, Arc::new(FlakyAdapter { venue: Venue::Binance, fail: false }));
        DataFacade::new(adapters, health, Duration::from_secs(15), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn successful_fetch_populates_caches() {
        let facade = build_facade(false);
        let symbol = Symbol::new("BTC-USD");
        let (bars, attribution) = facade.get_bars(&symbol, 3600, 50).await.unwrap();
        assert!(bars.len() >= 20);
        assert_eq!(attribution.venue, Venue::Kraken);
        assert!(!attribution.cache_hit);
        assert_eq!(attribution.confidence, 1.0);
    }

    #[tokio::test]
    async fn cascades_to_next_venue_on_failure() {
        let facade = build_facade(true);
        let symbol = Symbol::new("ETH-USD");
        let (_, attribution) = facade.get_bars(&symbol, 3600, 50).await.unwrap();
        assert_eq!(attribution.venue, Venue::Okx);
        assert_eq!(attribution.fallback_from, Some(Venue::Kraken));
    }

    #[tokio::test]
    async fn second_fetch_is_a_cache_hit() {
        let facade = build_facade(false);
        let symbol = Symbol::new("SOL-USD");
        let _ = facade.get_bars(&symbol, 3600, 50).await.unwrap();
        let (_, attribution) = facade.get_bars(&symbol, 3600, 50).await.unwrap();
        assert!(attribution.cache_hit);
    }

    #[tokio::test]
    async fn yellow_venue_doubles_effective_ttl() {
        let facade = build_facade(false);
        let symbol = Symbol::new("AVAX-USD");
        let _ = facade.get_bars(&symbol, 3600, 50).await.unwrap();

        for _ in 0..5 {
            facade.health.record_success(Venue::Kraken, 1500.0);
        }
        assert_eq!(facade.health_status(Venue::Kraken).status, HealthStatus::Yellow);

        let key: BarKey = (symbol.clone(), 3600);
        let now = Instant::now() + Duration::from_secs(20);
        let lookup = facade.lookup_bars_tier(&facade.hot_bars, &key, facade.hot_ttl, now);
        assert!(lookup.is_some(), "entry should still be fresh under the doubled TTL");
    }

    #[tokio::test]
    async fn cold_tier_receives_write_through_snapshot() {
        let dir = std::env::temp_dir().join(format!("facade-pit-test-{}", uuid::Uuid::new_v4()));
        let facade = build_facade(false).with_cold_tier(PitStore::new(&dir));
        let symbol = Symbol::new("DOGE-USD");
        let (_, attribution) = facade.get_bars(&symbol, 3600, 50).await.unwrap();
        assert!(facade.cold.as_ref().unwrap().exists(&symbol, attribution.ts_ms));
        std::fs::remove_dir_all(&dir).ok();
    }
}
