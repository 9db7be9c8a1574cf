// =============================================================================
// Scan orchestrator — Scan(ctx, universe, now) -> ScanOutput (spec §4.6)
// =============================================================================
//
// Eight-stage per-symbol pipeline driven with bounded concurrency: a
// `tokio::sync::Semaphore` sized to `num_cpus::get()` caps in-flight symbol
// work the same way the reference engine bounds its WS/REST fan-out. Any
// per-symbol stage failure marks that symbol `skipped` with a reason rather
// than aborting the whole scan; only cancellation or an unavailable regime
// aborts the scan outright.
// =============================================================================

use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tracing::{instrument, warn};

use crate::config::{GateConfig, ScanConfig};
use crate::errors::ScanError;
use crate::facade::DataFacade;
use crate::factors::engine::{acceleration_4h, FactorEngine, FactorInputs, TimeframeBars};
use crate::factors::indicators::{calculate_vadr, vadr_percentile};
use crate::factors::orthogonal::orthogonalize;
use crate::gates::{self, GateInputs, GraceTracker};
use crate::regime::RegimeDetector;
use crate::scoring::composite_score;
use crate::types::{Candidate, FactorSet, ScanOutput, SkippedSymbol, Symbol};

/// Per-symbol facade/factor inputs the orchestrator needs but cannot derive
/// from the facade alone (funding, ADV, social, catalyst feeds). Resolved by
/// the caller per the spec's open questions around external data sources.
pub struct SymbolContext {
    pub symbol: Symbol,
    pub adv_usd: f64,
    pub funding_z: Option<f64>,
    pub market_cap_tier: f64,
    pub catalyst_event_score: f64,
    pub catalyst_event_age_s: f64,
    pub history: Vec<FactorSet>,
}

pub struct Scanner {
    facade: Arc<DataFacade>,
    regime_detector: Arc<RegimeDetector>,
    config: ScanConfig,
    grace_tracker: Arc<GraceTracker>,
}

impl Scanner {
    pub fn new(facade: Arc<DataFacade>, regime_detector: Arc<RegimeDetector>, config: ScanConfig) -> Self {
        Self { facade, regime_detector, config, grace_tracker: Arc::new(GraceTracker::new()) }
    }

    /// Run the full 8-stage pipeline over `universe`.
    #[instrument(skip(self, universe, cancel, context_for))]
    pub async fn scan<C, Fut>(
        &self,
        universe: Vec<SymbolContext>,
        now_ms: i64,
        mut cancel: watch::Receiver<bool>,
        context_for: C,
    ) -> Result<ScanOutput, ScanError>
    where
        C: Fn(Symbol) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<TimeframeBars, String>> + Send,
    {
        // Stage 3: regime lookup. Whole-scan abort if no regime is cached.
        let regime_state = self
            .regime_detector
            .current_within(4 * 3_600_000, now_ms)
            .ok_or(ScanError::RegimeUnavailable)?;
        let weights = self.config.regime.weight_for(regime_state.regime);

        let semaphore = Arc::new(Semaphore::new(self.config.scan_concurrency.max(1)));
        let context_for = Arc::new(context_for);
        let gate_config = Arc::new(self.config.gates.clone());

        let mut tasks = Vec::with_capacity(universe.len());
        for ctx in universe {
            if *cancel.borrow() {
                break;
            }
            let semaphore = semaphore.clone();
            let facade = self.facade.clone();
            let context_for = context_for.clone();
            let gate_config = gate_config.clone();
            let grace_tracker = self.grace_tracker.clone();
            let regime = regime_state.regime;

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                run_symbol_pipeline(facade, context_for, ctx, regime, weights, gate_config, grace_tracker, now_ms)
                    .await
            }));
        }

        let mut candidates = Vec::new();
        let mut gate_rejected = Vec::new();
        let mut skipped = Vec::new();
        let mut partial = false;

        for task in tasks {
            match task.await {
                Ok(Ok(candidate)) => {
                    if candidate.gate_report.admissible() {
                        candidates.push(candidate);
                    } else {
                        gate_rejected.push(candidate);
                    }
                }
                Ok(Err(skip)) => skipped.push(skip),
                Err(e) => {
                    warn!(error = %e, "symbol task panicked");
                    partial = true;
                }
            }
        }

        if *cancel.borrow() {
            partial = true;
        }

        candidates.sort_by(|a: &Candidate, b: &Candidate| b.score.partial_cmp(&a.score).unwrap());
        for (i, c) in candidates.iter_mut().enumerate() {
            c.rank = i + 1;
        }

        Ok(ScanOutput { candidates, skipped, gate_rejected, partial })
    }
}

async fn run_symbol_pipeline<C, Fut>(
    facade: Arc<DataFacade>,
    context_for: Arc<C>,
    ctx: SymbolContext,
    regime: crate::types::Regime,
    weights: crate::types::WeightBlend,
    gate_config: Arc<GateConfig>,
    grace_tracker: Arc<GraceTracker>,
    scan_started_ms: i64,
) -> Result<Candidate, SkippedSymbol>
where
    C: Fn(Symbol) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<TimeframeBars, String>> + Send,
{
    let symbol = ctx.symbol.clone();

    // Stage 2: data fetch (order book; klines handled by `context_for`).
    let (order_book, attribution) = facade.get_order_book(&symbol, 50).await.map_err(|e| SkippedSymbol {
        symbol: symbol.clone(),
        stage: "data_fetch".to_string(),
        reason: e.to_string(),
    })?;

    let bars = context_for(symbol.clone()).await.map_err(|reason| SkippedSymbol {
        symbol: symbol.clone(),
        stage: "data_fetch".to_string(),
        reason,
    })?;

    // Stage 4: factor computation.
    let vadr = calculate_vadr(&bars.h1, gate_config.vadr_min_bars).unwrap_or(0.0);
    let obv_slope = crate::factors::indicators::obv_slope(&bars.h1, gate_config.vadr_min_bars).unwrap_or(0.0);
    let inputs = FactorInputs {
        bars,
        order_book: order_book.clone(),
        adv_usd: ctx.adv_usd,
        vadr,
        market_cap_tier: ctx.market_cap_tier,
        obv_slope,
        catalyst_event_score: ctx.catalyst_event_score,
        catalyst_event_age_s: ctx.catalyst_event_age_s,
        social_raw: 0.0,
    };
    let raw_factors = FactorEngine::compute(&inputs, regime);

    // Stage 5: orthogonalization against the symbol's rolling history.
    let mut history = ctx.history;
    history.push(raw_factors);
    let residuals = orthogonalize(&history);

    // Stage 6: scoring, discounted by the worst-feed-wins freshness penalty.
    let score = composite_score(&residuals, &weights) * attribution.confidence;

    // Stage 7: gate evaluation.
    let movement_pct_24h = inputs.bars.h24.first().zip(inputs.bars.h24.last()).map(|(f, l)| {
        if f.c != 0.0 { (l.c - f.c) / f.c * 100.0 } else { 0.0 }
    }).unwrap_or(0.0);
    let price_direction_sign = movement_pct_24h.signum();

    let bar_interval_ms = inputs
        .bars
        .h1
        .get(1)
        .zip(inputs.bars.h1.first())
        .map(|(second, first)| (second.ts_open_ms - first.ts_open_ms).max(1))
        .unwrap_or(3_600_000);
    let bar_age_bars = inputs
        .bars
        .h1
        .last()
        .map(|last| ((scan_started_ms - last.ts_close_ms).max(0) / bar_interval_ms) as u32)
        .unwrap_or(0);
    let signal_price = inputs.bars.h1.last().map(|b| b.c).unwrap_or(0.0);
    let price_move_since_signal = order_book.mid().map(|mid| mid - signal_price).unwrap_or(0.0);

    let venue_p99_latency_ms = facade.health_status(attribution.venue).p99_latency_ms;
    let execution_delay_s = (attribution.fetched_at_ms - scan_started_ms).max(0) as f64 / 1000.0;
    let grace_window_available =
        grace_tracker.is_available(&symbol, scan_started_ms, gate_config.latefill_grace_cooldown_minutes);
    let grace_eligible =
        venue_p99_latency_ms > gate_config.latefill_p99_threshold_ms && grace_window_available;

    let gate_inputs = GateInputs {
        final_score: score,
        regime,
        movement_pct_24h,
        vadr,
        vadr_bars: inputs.bars.h1.len(),
        volume_24h_usd: inputs.bars.h24.iter().map(|b| b.volume * b.c).sum(),
        spread_bps: order_book.spread_bps().unwrap_or(f64::MAX),
        depth_usd_2pct: order_book.depth_within_pct(2.0).unwrap_or(0.0),
        funding_z: ctx.funding_z,
        price_direction_sign,
        adx: crate::factors::indicators::calculate_adx(&inputs.bars.h4, 14),
        hurst: crate::regime::calculate_hurst_exponent(&inputs.bars.h24.iter().map(|b| b.c).collect::<Vec<_>>()),
        bar_age_bars,
        atr_1h: crate::factors::indicators::calculate_atr(&inputs.bars.h1, 14).unwrap_or(1.0),
        price_move_since_signal,
        momentum_24h_abs_pct: movement_pct_24h.abs(),
        rsi_4h: crate::factors::indicators::calculate_rsi(
            &inputs.bars.h4.iter().map(|b| b.c).collect::<Vec<_>>(),
            14,
        )
        .last()
        .copied()
        .unwrap_or(50.0),
        acceleration_4h_pct: acceleration_4h(&inputs.bars.h4),
        execution_delay_s,
        venue_p99_latency_ms,
        grace_window_available,
        adv_usd: ctx.adv_usd,
        p80_rolling_vadr: vadr_percentile(&inputs.bars.h1, gate_config.vadr_min_bars, 0.8),
    };

    let gate_report = gates::evaluate(&gate_inputs, &gate_config);

    if grace_eligible {
        if let Some(late_fill) = gate_report.guards.iter().find(|g| g.gate_name == "late_fill") {
            if late_fill.passed {
                grace_tracker.mark_used(&symbol, scan_started_ms);
            }
        }
    }

    // VADR "insufficient_bars" means the candidate couldn't be evaluated at
    // all, not that it failed the gate — surface it as a skip, not a
    // gate-rejected candidate.
    if let Some(vadr) = gate_report.hard_gates.iter().find(|g| g.gate_name == "vadr") {
        if vadr.reason == "insufficient_bars" {
            return Err(SkippedSymbol {
                symbol: symbol.clone(),
                stage: "gates".to_string(),
                reason: "insufficient_bars".to_string(),
            });
        }
    }

    // Stage 8: rank and emit (ranking assigned by the caller after sorting;
    // non-admissible candidates are bucketed into `gate_rejected` there).
    Ok(Candidate {
        symbol,
        score,
        rank: 0,
        factors: raw_factors,
        residuals,
        gate_report,
        regime,
        attribution,
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::VenueHealthTracker;
    use crate::types::{Bar, OrderBook, PriceLevel, Venue};
    use crate::venues::VenueAdapter;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    struct StubAdapter;

    #[async_trait]
    impl VenueAdapter for StubAdapter {
        fn venue(&self) -> Venue {
            Venue::Kraken
        }

        async fn get_klines(
            &self,
            _s: &Symbol,
            _i: u64,
            limit: u32,
        ) -> Result<Vec<Bar>, crate::errors::VenueError> {
            Ok((0..limit.max(25))
                .map(|i| Bar { ts_open_ms: i as i64, ts_close_ms: i as i64 + 1, o: 100.0, h: 101.0, l: 99.0, c: 100.0 + i as f64 * 0.1, volume: 10.0 })
                .collect())
        }

        async fn get_order_book(&self, symbol: &Symbol, _d: u32) -> Result<OrderBook, crate::errors::VenueError> {
            Ok(OrderBook {
                venue: Venue::Kraken,
                symbol: symbol.clone(),
                ts_ms: 0,
                seq: 1,
                bids: vec![PriceLevel { price: 99.0, size: 100.0 }],
                asks: vec![PriceLevel { price: 100.0, size: 100.0 }],
            })
        }

        async fn ping(&self) -> Result<(), crate::errors::VenueError> {
            Ok(())
        }
    }

    fn build_scanner() -> Scanner {
        let health = Arc::new(VenueHealthTracker::new());
        let mut adapters: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
        for v in crate::types::VENUE_CASCADE {
            adapters.insert(v, Arc::new(StubAdapter));
        }
        let facade = Arc::new(DataFacade::new(adapters, health, Duration::from_secs(15), Duration::from_secs(300)));
        let detector = RegimeDetector::new();
        detector.detect(
            crate::types::RegimeIndicators { vol_7d: 0.1, breadth_above_ma: 0.75, breadth_thrust: 0.8 },
            0.70,
            0,
        );
        Scanner::new(facade, detector, ScanConfig::default())
    }

    fn flat_bars(n: usize) -> TimeframeBars {
        let bars: Vec<Bar> = (0..n)
            .map(|i| Bar { ts_open_ms: i as i64, ts_close_ms: i as i64 + 1, o: 100.0, h: 101.0, l: 99.0, c: 102.0 + i as f64 * 0.05, volume: 1000.0 })
            .collect();
        TimeframeBars { h1: bars.clone(), h4: bars.clone(), h12: bars.clone(), h24: bars.clone(), d7: vec![] }
    }

    #[tokio::test]
    async fn scan_aborts_when_no_regime_cached() {
        let health = Arc::new(VenueHealthTracker::new());
        let adapters: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
        let facade = Arc::new(DataFacade::new(adapters, health, Duration::from_secs(15), Duration::from_secs(300)));
        let detector = RegimeDetector::new();
        let scanner = Scanner::new(facade, detector, ScanConfig::default());
        let (_tx, rx) = watch::channel(false);

        let result = scanner.scan(vec![], 0, rx, |_s: Symbol| async move { Ok(TimeframeBars::default()) }).await;
        assert!(matches!(result, Err(ScanError::RegimeUnavailable)));
    }

    #[tokio::test]
    async fn scan_produces_ranked_candidates() {
        let scanner = build_scanner();
        let (_tx, rx) = watch::channel(false);

        let universe = vec![SymbolContext {
            symbol: Symbol::new("BTC-USD"),
            adv_usd: 50_000_000.0,
            funding_z: None,
            market_cap_tier: 0.9,
            catalyst_event_score: 0.2,
            catalyst_event_age_s: 0.0,
            history: vec![FactorSet {
                momentum_core: 5.0,
                technical: 55.0,
                volume: 60.0,
                quality: 70.0,
                catalyst: 20.0,
                social: 0.0,
            }],
        }];

        let result = scanner
            .scan(universe, 1_000, rx, |_s: Symbol| async move { Ok(flat_bars(30)) })
            .await
            .unwrap();

        let total = result.candidates.len() + result.gate_rejected.len() + result.skipped.len();
        assert_eq!(total, 1);
    }
}
