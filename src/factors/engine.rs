// =============================================================================
// Raw factor computation (spec §4.4)
// =============================================================================
//
// Six raw factors per symbol, computed directly from facade data: momentum
// is protected and carried through orthogonalization unchanged; the rest are
// composites later residualized against it by `orthogonal::orthogonalize`.
// =============================================================================

use crate::regime::calculate_hurst_exponent;
use crate::types::{Bar, FactorSet, OrderBook, Regime};

use super::indicators::{calculate_adx, calculate_bollinger, calculate_rsi};

/// Bars for each timeframe the momentum blend draws from. `d7` is only
/// consulted under `Regime::TrendingBull`.
#[derive(Debug, Clone, Default)]
pub struct TimeframeBars {
    pub h1: Vec<Bar>,
    pub h4: Vec<Bar>,
    pub h12: Vec<Bar>,
    pub h24: Vec<Bar>,
    pub d7: Vec<Bar>,
}

/// Everything `FactorEngine::compute` needs for one symbol at one instant.
/// The social and catalyst inputs are external feeds this system does not
/// itself source (spec's open question) — callers thread through whatever
/// they have, defaulting to `ScanConfig::social_factor_default` when no feed
/// is wired.
#[derive(Debug, Clone)]
pub struct FactorInputs {
    pub bars: TimeframeBars,
    pub order_book: OrderBook,
    pub adv_usd: f64,
    pub vadr: f64,
    pub market_cap_tier: f64,
    pub obv_slope: f64,
    pub catalyst_event_score: f64,
    pub catalyst_event_age_s: f64,
    pub social_raw: f64,
}

pub struct FactorEngine;

impl FactorEngine {
    pub fn compute(inputs: &FactorInputs, regime: Regime) -> FactorSet {
        let momentum_core = momentum_core(&inputs.bars, regime);
        let technical = technical_composite(&inputs.bars);
        let volume = volume_composite(inputs);
        let quality = quality_composite(inputs);
        let catalyst = catalyst_composite(&inputs.bars, inputs.catalyst_event_score, inputs.catalyst_event_age_s);

        FactorSet { momentum_core, technical, volume, quality, catalyst, social: inputs.social_raw }
    }
}

fn timeframe_return_pct(bars: &[Bar]) -> f64 {
    match (bars.first(), bars.last()) {
        (Some(first), Some(last)) if first.c != 0.0 => (last.c - first.c) / first.c * 100.0,
        _ => 0.0,
    }
}

/// Acceleration proxy: change in return between the newer and older half of
/// the 4h window — a discrete second derivative of price. Reused by the
/// orchestrator for the fatigue guard's `acceleration_4h_pct` input.
pub(crate) fn acceleration_4h(bars: &[Bar]) -> f64 {
    if bars.len() < 4 {
        return 0.0;
    }
    let mid = bars.len() / 2;
    let older = timeframe_return_pct(&bars[..=mid]);
    let newer = timeframe_return_pct(&bars[mid..]);
    newer - older
}

fn momentum_core(bars: &TimeframeBars, regime: Regime) -> f64 {
    let r1h = timeframe_return_pct(&bars.h1);
    let r4h = timeframe_return_pct(&bars.h4);
    let r12h = timeframe_return_pct(&bars.h12);
    let r24h = timeframe_return_pct(&bars.h24);

    let weighted = if regime == Regime::TrendingBull && !bars.d7.is_empty() {
        let r7d = timeframe_return_pct(&bars.d7);
        0.15 * r1h + 0.30 * r4h + 0.25 * r12h + 0.20 * r24h + 0.10 * r7d
    } else {
        0.20 * r1h + 0.35 * r4h + 0.30 * r12h + 0.15 * r24h
    };

    let a4h = acceleration_4h(&bars.h4);
    let boost = (a4h.abs() / 5.0).tanh() * 2.0 * a4h.signum();

    weighted + boost
}

fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.c).collect()
}

/// Composite of RSI(14), ADX, and the Hurst proxy, normalized to 0-100.
/// Unavailable components (insufficient history) are dropped and the
/// remaining weights renormalized, so a short history still yields a score.
fn technical_composite(bars: &TimeframeBars) -> f64 {
    let h4_closes = closes(&bars.h4);
    let h4_rsi = calculate_rsi(&h4_closes, 14).last().copied();
    let h4_adx = calculate_adx(&bars.h4, 14);
    let hurst = calculate_hurst_exponent(&closes(&bars.h24));

    let mut total_weight = 0.0;
    let mut sum = 0.0;

    if let Some(rsi) = h4_rsi {
        sum += 0.40 * rsi;
        total_weight += 0.40;
    }
    if let Some(adx) = h4_adx {
        sum += 0.35 * adx.min(100.0);
        total_weight += 0.35;
    }
    if let Some(h) = hurst {
        sum += 0.25 * (h * 100.0);
        total_weight += 0.25;
    }

    if total_weight == 0.0 {
        return 50.0;
    }
    (sum / total_weight).clamp(0.0, 100.0)
}

/// Composite of the 24h volume ratio against ADV, VWAP deviation, and OBV
/// slope, normalized to 0-100.
fn volume_composite(inputs: &FactorInputs) -> f64 {
    let h24 = &inputs.bars.h24;
    let total_quote_volume: f64 = h24.iter().map(|b| b.volume * b.c).sum();

    let vol_ratio_component = if inputs.adv_usd > 0.0 {
        (total_quote_volume / inputs.adv_usd).min(2.0) * 50.0
    } else {
        0.0
    };

    let vwap = if h24.is_empty() {
        0.0
    } else {
        let (num, den) = h24.iter().fold((0.0, 0.0), |(n, d), b| (n + b.c * b.volume, d + b.volume));
        if den > 0.0 { num / den } else { 0.0 }
    };
    let last_close = h24.last().map(|b| b.c).unwrap_or(0.0);
    let vwap_dev_component = if vwap > 0.0 {
        (((last_close - vwap) / vwap * 100.0).clamp(-50.0, 50.0)) + 50.0
    } else {
        50.0
    };

    let obv_component = (inputs.obv_slope.clamp(-1.0, 1.0) * 50.0) + 50.0;

    (0.5 * vol_ratio_component + 0.25 * vwap_dev_component + 0.25 * obv_component).clamp(0.0, 100.0)
}

/// Composite of spread (inverted), depth, VADR, and market-cap tier,
/// normalized to 0-100.
fn quality_composite(inputs: &FactorInputs) -> f64 {
    let spread_bps = inputs.order_book.spread_bps().unwrap_or(f64::MAX);
    let spread_component = (100.0 - spread_bps * 2.0).clamp(0.0, 100.0);

    let depth_usd = inputs.order_book.depth_within_pct(2.0).unwrap_or(0.0);
    let depth_component = (depth_usd / 150_000.0 * 100.0).clamp(0.0, 100.0);

    let vadr_component = (inputs.vadr / 3.0 * 100.0).clamp(0.0, 100.0);
    let market_cap_component = (inputs.market_cap_tier * 100.0).clamp(0.0, 100.0);

    (0.30 * spread_component + 0.30 * depth_component + 0.25 * vadr_component + 0.15 * market_cap_component)
        .clamp(0.0, 100.0)
}

/// Bollinger-width compression inverse-z-score times 0.6 plus a time-decayed
/// catalyst-event score times 0.4. Normalized 0-1, then scaled to 0-100.
fn catalyst_composite(bars: &TimeframeBars, event_score: f64, event_age_s: f64) -> f64 {
    let h4_closes = closes(&bars.h4);
    let bbw_inv_z = calculate_bollinger(&h4_closes, 20, 2.0)
        .map(|bb| (1.0 / (1.0 + bb.width)).clamp(0.0, 1.0))
        .unwrap_or(0.5);

    // Half-life of 4h for the catalyst-event score's time decay.
    let decay = (-event_age_s / (4.0 * 3600.0)).exp();
    let decayed_event = (event_score * decay).clamp(0.0, 1.0);

    (bbw_inv_z * 0.6 + decayed_event * 0.4) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceLevel;

    fn bar_at(c: f64) -> Bar {
        Bar { ts_open_ms: 0, ts_close_ms: 0, o: c, h: c, l: c, c, volume: 10.0 }
    }

    fn ramp(n: usize, start: f64, step: f64) -> Vec<Bar> {
        (0..n).map(|i| bar_at(start + step * i as f64)).collect()
    }

    fn empty_book() -> OrderBook {
        OrderBook {
            venue: crate::types::Venue::Kraken,
            symbol: crate::types::Symbol::new("BTC-USD"),
            ts_ms: 0,
            seq: 0,
            bids: vec![PriceLevel { price: 99.0, size: 10.0 }],
            asks: vec![PriceLevel { price: 100.0, size: 10.0 }],
        }
    }

    #[test]
    fn momentum_core_uses_four_timeframes_outside_trending_bull() {
        let bars = TimeframeBars {
            h1: ramp(5, 100.0, 1.0),
            h4: ramp(5, 100.0, 1.0),
            h12: ramp(5, 100.0, 1.0),
            h24: ramp(5, 100.0, 1.0),
            d7: vec![],
        };
        let m = momentum_core(&bars, Regime::Choppy);
        assert!(m.is_finite());
    }

    #[test]
    fn momentum_core_extends_to_7d_in_trending_bull() {
        let mut bars = TimeframeBars {
            h1: ramp(5, 100.0, 1.0),
            h4: ramp(5, 100.0, 1.0),
            h12: ramp(5, 100.0, 1.0),
            h24: ramp(5, 100.0, 1.0),
            d7: ramp(5, 100.0, 5.0),
        };
        let with_7d = momentum_core(&bars, Regime::TrendingBull);
        bars.d7.clear();
        let without_7d = momentum_core(&bars, Regime::TrendingBull);
        assert_ne!(with_7d, without_7d);
    }

    #[test]
    fn technical_composite_falls_back_when_no_indicators_available() {
        let bars = TimeframeBars::default();
        assert_eq!(technical_composite(&bars), 50.0);
    }

    #[test]
    fn quality_composite_in_range() {
        let inputs = FactorInputs {
            bars: TimeframeBars::default(),
            order_book: empty_book(),
            adv_usd: 1_000_000.0,
            vadr: 2.0,
            market_cap_tier: 0.8,
            obv_slope: 0.2,
            catalyst_event_score: 0.5,
            catalyst_event_age_s: 0.0,
            social_raw: 0.0,
        };
        let q = quality_composite(&inputs);
        assert!((0.0..=100.0).contains(&q));
    }

    #[test]
    fn catalyst_composite_decays_with_age() {
        let bars = TimeframeBars { h4: ramp(25, 100.0, 0.1), ..Default::default() };
        let fresh = catalyst_composite(&bars, 1.0, 0.0);
        let stale = catalyst_composite(&bars, 1.0, 48.0 * 3600.0);
        assert!(fresh > stale);
    }
}
