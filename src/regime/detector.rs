// =============================================================================
// Market Regime Detector — 4h majority-vote classifier
// =============================================================================
//
// Same shape as the reference engine's regime detector: an `Arc`-wrapped
// struct holding `RwLock<Option<RegimeState>>` plus a `last_change_time`
// used to detect genuine regime *changes* (not just re-detection of the
// same regime), logged at `debug!`/`info!`. The five-bucket priority-order
// classifier is replaced with a three-bucket majority vote plus hysteresis,
// since that's the aggregation rule this system specifies.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::types::{Regime, RegimeIndicators, RegimeState};

const ALL_REGIMES: [Regime; 3] = [Regime::TrendingBull, Regime::Choppy, Regime::HighVol];

pub struct RegimeDetector {
    state: RwLock<Option<RegimeState>>,
    last_change_time: RwLock<Instant>,
}

impl RegimeDetector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(None),
            last_change_time: RwLock::new(Instant::now()),
        })
    }

    /// Run the 4h regime vote. `thrust_threshold` comes from config
    /// (`regime.thrust_threshold`) so it can be recalibrated without a
    /// rebuild. `now_ms` is the wall-clock timestamp stamped on the
    /// resulting `RegimeState`.
    pub fn detect(&self, indicators: RegimeIndicators, thrust_threshold: f64, now_ms: i64) -> RegimeState {
        let previous = self.state.read().as_ref().map(|s| s.regime);
        let (regime, confidence) = classify(indicators, thrust_threshold, previous);

        let now = Instant::now();
        if previous != Some(regime) {
            *self.last_change_time.write() = now;
            info!(from = ?previous, to = %regime, confidence, "regime switch");
        }

        let new_state = RegimeState { regime, confidence, detected_at_ms: now_ms, indicators };

        debug!(
            regime = %regime,
            confidence = format!("{confidence:.3}"),
            vol_7d = indicators.vol_7d,
            breadth_above_ma = indicators.breadth_above_ma,
            breadth_thrust = indicators.breadth_thrust,
            "regime detected"
        );

        *self.state.write() = Some(new_state.clone());
        new_state
    }

    /// Most recently detected regime, if any detection has run.
    pub fn current(&self) -> Option<RegimeState> {
        self.state.read().clone()
    }

    /// Return the cached regime only if it is no older than `max_age_ms`.
    /// Used when a fresh detection fails but a recent-enough cached regime
    /// can stand in (spec: prefer stale-but-recent over aborting the scan).
    pub fn current_within(&self, max_age_ms: i64, now_ms: i64) -> Option<RegimeState> {
        let state = self.state.read().clone()?;
        if now_ms.saturating_sub(state.detected_at_ms) <= max_age_ms {
            Some(state)
        } else {
            None
        }
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self {
            state: RwLock::new(None),
            last_change_time: RwLock::new(Instant::now()),
        }
    }
}

/// Majority vote over the three regime indicators, with hysteresis on ties
/// and a stability check against the previous regime.
fn classify(ind: RegimeIndicators, thrust_threshold: f64, previous: Option<Regime>) -> (Regime, f64) {
    let mut votes: HashMap<Regime, usize> = HashMap::new();

    // Vote 1: realized 7d volatility. Abstains (casts no vote) when not
    // elevated, rather than voting for a specific non-high-vol regime.
    if ind.vol_7d > 0.25 {
        *votes.entry(Regime::HighVol).or_insert(0) += 1;
    }

    // Vote 2: breadth above 20d MA.
    if ind.breadth_above_ma > 0.60 {
        *votes.entry(Regime::TrendingBull).or_insert(0) += 1;
    } else {
        *votes.entry(Regime::Choppy).or_insert(0) += 1;
    }

    // Vote 3: breadth thrust proxy.
    if ind.breadth_thrust > thrust_threshold {
        *votes.entry(Regime::TrendingBull).or_insert(0) += 1;
    } else {
        *votes.entry(Regime::Choppy).or_insert(0) += 1;
    }

    let max_count = ALL_REGIMES.iter().map(|r| votes.get(r).copied().unwrap_or(0)).max().unwrap_or(0);

    let winner = match previous {
        // Prefer the previous regime among tied leaders (hysteresis).
        Some(prev) if votes.get(&prev).copied().unwrap_or(0) == max_count => prev,
        _ => ALL_REGIMES
            .into_iter()
            .find(|r| votes.get(r).copied().unwrap_or(0) == max_count)
            .unwrap_or(Regime::Choppy),
    };

    // Stability: only accept a switch once the winner's vote count is
    // strictly ahead of the current regime's. Because ties already resolve
    // to `previous` above, reaching this branch with `winner != previous`
    // already implies `winner`'s count is strictly greater.
    let regime = match previous {
        Some(prev) if prev != winner => {
            let prev_count = votes.get(&prev).copied().unwrap_or(0);
            let winner_count = votes.get(&winner).copied().unwrap_or(0);
            if winner_count > prev_count {
                winner
            } else {
                prev
            }
        }
        Some(prev) => prev,
        None => winner,
    };

    let confidence = (max_count as f64 / 3.0).max(1.0 / 3.0);
    (regime, confidence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ind(vol_7d: f64, breadth_above_ma: f64, breadth_thrust: f64) -> RegimeIndicators {
        RegimeIndicators { vol_7d, breadth_above_ma, breadth_thrust }
    }

    #[test]
    fn unanimous_trending_bull() {
        let (regime, confidence) = classify(ind(0.10, 0.75, 0.80), 0.70, None);
        assert_eq!(regime, Regime::TrendingBull);
        assert!((confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn high_vol_dominates_with_all_three_votes() {
        let (regime, confidence) = classify(ind(0.40, 0.30, 0.20), 0.70, None);
        // vol votes high_vol; breadth votes choppy twice -> choppy wins 2-1.
        assert_eq!(regime, Regime::Choppy);
        assert!((confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn scenario_s6_regime_switch_from_trending_bull_to_choppy() {
        // vote = {trending_bull: 1, choppy: 2, high_vol: 0}, previous trending_bull.
        let (regime, confidence) = classify(ind(0.10, 0.40, 0.80), 0.70, Some(Regime::TrendingBull));
        assert_eq!(regime, Regime::Choppy);
        assert!((confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn tie_prefers_previous_regime() {
        // breadth_above_ma votes trending_bull, breadth_thrust votes choppy -> 1-1 tie.
        let (regime, _) = classify(ind(0.10, 0.75, 0.50), 0.70, Some(Regime::Choppy));
        assert_eq!(regime, Regime::Choppy);
    }

    #[test]
    fn tie_with_no_previous_picks_deterministic_default() {
        let (regime, _) = classify(ind(0.10, 0.75, 0.50), 0.70, None);
        assert_eq!(regime, Regime::TrendingBull);
    }

    #[test]
    fn confidence_never_below_one_third() {
        let (_, confidence) = classify(ind(0.10, 0.50, 0.50), 0.70, None);
        assert!(confidence >= 1.0 / 3.0);
    }

    #[test]
    fn detector_tracks_state_and_switch_logging() {
        let detector = RegimeDetector::new();
        let s1 = detector.detect(ind(0.10, 0.75, 0.80), 0.70, 1_000);
        assert_eq!(s1.regime, Regime::TrendingBull);

        let s2 = detector.detect(ind(0.10, 0.40, 0.80), 0.70, 2_000);
        assert_eq!(s2.regime, Regime::Choppy);
        assert_eq!(detector.current().unwrap().regime, Regime::Choppy);
    }

    #[test]
    fn current_within_respects_staleness_bound() {
        let detector = RegimeDetector::new();
        detector.detect(ind(0.10, 0.75, 0.80), 0.70, 1_000);
        assert!(detector.current_within(12 * 3_600_000, 1_000 + 3_600_000).is_some());
        assert!(detector.current_within(12 * 3_600_000, 1_000 + 13 * 3_600_000).is_none());
    }
}
