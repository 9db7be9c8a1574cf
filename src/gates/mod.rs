// =============================================================================
// Gate evaluator — hard gates (fail-fast) and guards (evaluate-all)
// =============================================================================
//
// Hard gates run in strict precedence order and short-circuit on first
// failure (spec §4.5); guards always run to completion so the report is
// useful in explain mode even when the fast path stopped early. Both phases
// emit `GateOutcome` records so the caller can reconstruct exactly why a
// candidate was (or wasn't) admitted.
// =============================================================================

pub mod exits;

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::config::GateConfig;
use crate::types::{GateOutcome, GateReport, Regime, Symbol};

/// Everything the gate evaluator needs for one candidate at one instant.
#[derive(Debug, Clone)]
pub struct GateInputs {
    pub final_score: f64,
    pub regime: Regime,
    pub movement_pct_24h: f64,
    pub vadr: f64,
    pub vadr_bars: usize,
    pub volume_24h_usd: f64,
    pub spread_bps: f64,
    pub depth_usd_2pct: f64,
    pub funding_z: Option<f64>,
    pub price_direction_sign: f64,
    pub adx: Option<f64>,
    pub hurst: Option<f64>,

    pub bar_age_bars: u32,
    pub atr_1h: f64,
    pub price_move_since_signal: f64,
    pub momentum_24h_abs_pct: f64,
    pub rsi_4h: f64,
    pub acceleration_4h_pct: f64,
    pub execution_delay_s: f64,
    pub venue_p99_latency_ms: f64,
    pub grace_window_available: bool,
    pub adv_usd: f64,
    pub p80_rolling_vadr: f64,
}

pub fn evaluate(inputs: &GateInputs, cfg: &GateConfig) -> GateReport {
    GateReport { hard_gates: evaluate_hard_gates(inputs, cfg), guards: evaluate_guards(inputs, cfg) }
}

fn evaluate_hard_gates(inputs: &GateInputs, cfg: &GateConfig) -> Vec<GateOutcome> {
    let mut out = Vec::with_capacity(6);

    let score_floor = GateOutcome {
        gate_name: "score_floor".to_string(),
        passed: inputs.final_score >= cfg.score_floor,
        reason: "final score below floor".to_string(),
        observed: inputs.final_score,
        threshold: cfg.score_floor,
    };
    let score_floor_passed = score_floor.passed;
    out.push(score_floor);
    if !score_floor_passed {
        return out;
    }

    let floor = cfg.movement_floor_for(inputs.regime);
    let movement = GateOutcome {
        gate_name: "movement_floor".to_string(),
        passed: inputs.movement_pct_24h.abs() >= floor,
        reason: "24h movement below regime floor".to_string(),
        observed: inputs.movement_pct_24h.abs(),
        threshold: floor,
    };
    let movement_passed = movement.passed;
    out.push(movement);
    if !movement_passed {
        return out;
    }

    let vadr = if inputs.vadr_bars < cfg.vadr_min_bars {
        GateOutcome {
            gate_name: "vadr".to_string(),
            passed: false,
            reason: "insufficient_bars".to_string(),
            observed: inputs.vadr_bars as f64,
            threshold: cfg.vadr_min_bars as f64,
        }
    } else {
        GateOutcome {
            gate_name: "vadr".to_string(),
            passed: inputs.vadr >= cfg.vadr_min,
            reason: "vadr below minimum".to_string(),
            observed: inputs.vadr,
            threshold: cfg.vadr_min,
        }
    };
    let vadr_passed = vadr.passed;
    out.push(vadr);
    if !vadr_passed {
        return out;
    }

    let liquidity_ok = inputs.volume_24h_usd >= 500_000.0
        && inputs.spread_bps <= 50.0
        && inputs.depth_usd_2pct >= 100_000.0;
    out.push(GateOutcome {
        gate_name: "liquidity".to_string(),
        passed: liquidity_ok,
        reason: "volume/spread/depth below liquidity floor".to_string(),
        observed: inputs.volume_24h_usd,
        threshold: 500_000.0,
    });
    if !liquidity_ok {
        return out;
    }

    let funding_outcome = match inputs.funding_z {
        Some(z) => GateOutcome {
            gate_name: "funding_divergence".to_string(),
            passed: z.signum() == inputs.price_direction_sign || z == 0.0,
            reason: "funding z-score sign diverges from price direction".to_string(),
            observed: z,
            threshold: 0.0,
        },
        None => GateOutcome {
            gate_name: "funding_divergence".to_string(),
            passed: true,
            reason: "not_applicable".to_string(),
            observed: 0.0,
            threshold: 0.0,
        },
    };
    let funding_passed = funding_outcome.passed;
    out.push(funding_outcome);
    if !funding_passed {
        return out;
    }

    let trend_quality_ok =
        inputs.adx.map(|v| v > cfg.adx_trend_min).unwrap_or(false) || inputs.hurst.map(|v| v > cfg.hurst_trend_min).unwrap_or(false);
    out.push(GateOutcome {
        gate_name: "trend_quality".to_string(),
        passed: trend_quality_ok,
        reason: "neither ADX nor Hurst indicate a trending market".to_string(),
        observed: inputs.adx.unwrap_or(0.0),
        threshold: cfg.adx_trend_min,
    });

    out
}

fn evaluate_guards(inputs: &GateInputs, cfg: &GateConfig) -> Vec<GateOutcome> {
    let mut out = Vec::with_capacity(4);

    let trending = inputs.regime == Regime::TrendingBull;
    let max_bar_age = if trending { 3 } else { 2 };
    let atr_multiple = if trending { 1.5 } else { 1.2 };
    let freshness_ok =
        inputs.bar_age_bars <= max_bar_age && inputs.price_move_since_signal.abs() <= atr_multiple * inputs.atr_1h;
    out.push(GateOutcome {
        gate_name: "freshness".to_string(),
        passed: freshness_ok,
        reason: "signal bar too old or price moved too far since signal".to_string(),
        observed: inputs.bar_age_bars as f64,
        threshold: max_bar_age as f64,
    });

    let fatigue_momentum_threshold = if inputs.regime == Regime::HighVol { 15.0 } else { 10.0 };
    let fatigue_triggered = inputs.momentum_24h_abs_pct > fatigue_momentum_threshold.max(12.0) && inputs.rsi_4h > 70.0;
    let fatigue_overridden = inputs.acceleration_4h_pct >= 2.0;
    out.push(GateOutcome {
        gate_name: "fatigue".to_string(),
        passed: !fatigue_triggered || fatigue_overridden,
        reason: "extended move plus overbought RSI without acceleration override".to_string(),
        observed: inputs.momentum_24h_abs_pct,
        threshold: fatigue_momentum_threshold,
    });

    let grace_eligible =
        inputs.venue_p99_latency_ms > cfg.latefill_p99_threshold_ms && inputs.grace_window_available;
    let effective_limit_s =
        if grace_eligible { cfg.latefill_base_seconds + cfg.latefill_grace_seconds } else { cfg.latefill_base_seconds };
    out.push(GateOutcome {
        gate_name: "late_fill".to_string(),
        passed: inputs.execution_delay_s < effective_limit_s,
        reason: "execution delay exceeded signal-to-fill limit".to_string(),
        observed: inputs.execution_delay_s,
        threshold: effective_limit_s,
    });

    let (tier_spread, tier_depth, tier_vadr_min) = microstructure_tier(inputs.adv_usd);
    let effective_vadr_min = tier_vadr_min.max(inputs.p80_rolling_vadr);
    let micro_ok =
        inputs.spread_bps <= tier_spread && inputs.depth_usd_2pct >= tier_depth && inputs.vadr >= effective_vadr_min;
    out.push(GateOutcome {
        gate_name: "microstructure_tier".to_string(),
        passed: micro_ok,
        reason: "liquidity tier thresholds not met".to_string(),
        observed: inputs.vadr,
        threshold: effective_vadr_min,
    });

    out
}

/// `(spread_bps_max, depth_usd_min, vadr_min)` for the ADV-based liquidity tier.
fn microstructure_tier(adv_usd: f64) -> (f64, f64, f64) {
    if adv_usd >= 5_000_000.0 {
        (25.0, 150_000.0, 1.85)
    } else if adv_usd >= 1_000_000.0 {
        (50.0, 75_000.0, 1.80)
    } else {
        (80.0, 25_000.0, 1.75)
    }
}

/// Per-symbol cooldown for the late-fill grace window. A symbol that has
/// just consumed its grace extension cannot draw on it again until
/// `cfg.latefill_grace_cooldown_minutes` has elapsed, even if the venue's
/// p99 latency stays above the grace threshold the whole time. Owned by the
/// orchestrator, not `evaluate`, so the gate evaluator stays a pure function.
pub struct GraceTracker {
    last_used_ms: Mutex<HashMap<Symbol, i64>>,
}

impl GraceTracker {
    pub fn new() -> Self {
        Self { last_used_ms: Mutex::new(HashMap::new()) }
    }

    /// Whether `symbol` may draw on the grace window at `now_ms`.
    pub fn is_available(&self, symbol: &Symbol, now_ms: i64, cooldown_minutes: f64) -> bool {
        match self.last_used_ms.lock().get(symbol) {
            None => true,
            Some(&last_used_ms) => (now_ms - last_used_ms) as f64 / 60_000.0 >= cooldown_minutes,
        }
    }

    /// Record that `symbol` consumed its grace window at `now_ms`.
    pub fn mark_used(&self, symbol: &Symbol, now_ms: i64) {
        self.last_used_ms.lock().insert(symbol.clone(), now_ms);
    }
}

impl Default for GraceTracker {
    fn default() -> Self {
        Self::new()
    }
}
