// =============================================================================
// Scan configuration — universe, regime, gates, cache, scheduler, venues
// =============================================================================
//
// Single root config struct for the whole engine, the same shape as
// `RuntimeConfig` in the reference engine: every field carries a serde
// default so an older config file on disk still loads after new fields are
// added, and persistence uses the write-tmp-then-rename pattern to avoid
// partial writes on crash.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{Regime, WeightBlend};

fn default_universe() -> Vec<String> {
    vec![
        "BTC-USD".to_string(),
        "ETH-USD".to_string(),
        "SOL-USD".to_string(),
        "XRP-USD".to_string(),
        "ADA-USD".to_string(),
    ]
}

fn default_score_floor() -> f64 {
    75.0
}

fn default_movement_floor_pct() -> HashMap<String, f64> {
    let mut m = HashMap::new();
    m.insert("trending_bull".to_string(), 2.5);
    m.insert("choppy".to_string(), 3.0);
    m.insert("high_vol".to_string(), 4.0);
    m
}

fn default_vadr_min() -> f64 {
    1.75
}

fn default_vadr_min_bars() -> usize {
    20
}

fn default_p80_window() -> usize {
    50
}

fn default_adx_trend_min() -> f64 {
    25.0
}

fn default_hurst_trend_min() -> f64 {
    0.55
}

fn default_freshness_soft_start_s() -> f64 {
    8.0
}

fn default_freshness_tau_s() -> f64 {
    30.0
}

fn default_freshness_hard_limit_s() -> f64 {
    90.0
}

fn default_latefill_base_seconds() -> f64 {
    30.0
}

fn default_latefill_p99_threshold_ms() -> f64 {
    400.0
}

fn default_latefill_grace_seconds() -> f64 {
    30.0
}

fn default_latefill_grace_cooldown_minutes() -> f64 {
    15.0
}

fn default_thrust_threshold() -> f64 {
    0.70
}

fn default_hot_ttl_s() -> u64 {
    15
}

fn default_warm_ttl_s() -> u64 {
    300
}

fn default_cold_ttl_s() -> u64 {
    86_400
}

fn default_scan_concurrency() -> usize {
    num_cpus::get().max(1)
}

fn default_regime_weights() -> HashMap<String, WeightBlend> {
    let mut m = HashMap::new();
    m.insert(
        "trending_bull".to_string(),
        WeightBlend {
            w_momentum: 0.425,
            w_technical: 0.20,
            w_volume: 0.155,
            w_quality: 0.085,
            w_catalyst: 0.135,
        },
    );
    m.insert(
        "choppy".to_string(),
        WeightBlend {
            w_momentum: 0.275,
            w_technical: 0.25,
            w_volume: 0.175,
            w_quality: 0.125,
            w_catalyst: 0.175,
        },
    );
    // Catalyst bumped 0.10 -> 0.11 versus the documented table: the table as
    // written sums to 0.99, violating the weight-blend invariant. See
    // DESIGN.md for this rounding correction.
    m.insert(
        "high_vol".to_string(),
        WeightBlend {
            w_momentum: 0.315,
            w_technical: 0.225,
            w_volume: 0.175,
            w_quality: 0.175,
            w_catalyst: 0.11,
        },
    );
    m
}

/// Hard-gate and guard thresholds (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_score_floor")]
    pub score_floor: f64,

    #[serde(default = "default_movement_floor_pct")]
    pub movement_floor_pct: HashMap<String, f64>,

    #[serde(default = "default_vadr_min")]
    pub vadr_min: f64,

    #[serde(default = "default_vadr_min_bars")]
    pub vadr_min_bars: usize,

    #[serde(default = "default_p80_window")]
    pub p80_window: usize,

    #[serde(default = "default_adx_trend_min")]
    pub adx_trend_min: f64,

    #[serde(default = "default_hurst_trend_min")]
    pub hurst_trend_min: f64,

    #[serde(default = "default_freshness_soft_start_s")]
    pub freshness_soft_start_s: f64,

    #[serde(default = "default_freshness_tau_s")]
    pub freshness_tau_s: f64,

    #[serde(default = "default_freshness_hard_limit_s")]
    pub freshness_hard_limit_s: f64,

    /// Base signal-to-fill limit before any grace extension (spec.md:288).
    #[serde(default = "default_latefill_base_seconds")]
    pub latefill_base_seconds: f64,

    /// Venue p99 latency above which the late-fill guard becomes grace-eligible.
    #[serde(default = "default_latefill_p99_threshold_ms")]
    pub latefill_p99_threshold_ms: f64,

    /// Seconds added to the base limit while a grace window is available.
    #[serde(default = "default_latefill_grace_seconds")]
    pub latefill_grace_seconds: f64,

    /// Cooldown after a grace window is consumed before it can be used again.
    #[serde(default = "default_latefill_grace_cooldown_minutes")]
    pub latefill_grace_cooldown_minutes: f64,
}

impl GateConfig {
    pub fn movement_floor_for(&self, regime: Regime) -> f64 {
        self.movement_floor_pct
            .get(&regime.to_string())
            .copied()
            .unwrap_or(self.movement_floor_pct_default())
    }

    fn movement_floor_pct_default(&self) -> f64 {
        3.0
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            score_floor: default_score_floor(),
            movement_floor_pct: default_movement_floor_pct(),
            vadr_min: default_vadr_min(),
            vadr_min_bars: default_vadr_min_bars(),
            p80_window: default_p80_window(),
            adx_trend_min: default_adx_trend_min(),
            hurst_trend_min: default_hurst_trend_min(),
            freshness_soft_start_s: default_freshness_soft_start_s(),
            freshness_tau_s: default_freshness_tau_s(),
            freshness_hard_limit_s: default_freshness_hard_limit_s(),
            latefill_base_seconds: default_latefill_base_seconds(),
            latefill_p99_threshold_ms: default_latefill_p99_threshold_ms(),
            latefill_grace_seconds: default_latefill_grace_seconds(),
            latefill_grace_cooldown_minutes: default_latefill_grace_cooldown_minutes(),
        }
    }
}

/// Regime-detector tunables (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    #[serde(default = "default_thrust_threshold")]
    pub thrust_threshold: f64,

    /// Per-regime scoring weight blends, keyed by `Regime::to_string()`.
    #[serde(default = "default_regime_weights")]
    pub weights: HashMap<String, WeightBlend>,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            thrust_threshold: default_thrust_threshold(),
            weights: default_regime_weights(),
        }
    }
}

impl RegimeConfig {
    pub fn weight_for(&self, regime: Regime) -> WeightBlend {
        self.weights
            .get(&regime.to_string())
            .copied()
            .unwrap_or(WeightBlend {
                w_momentum: 0.30,
                w_technical: 0.25,
                w_volume: 0.20,
                w_quality: 0.15,
                w_catalyst: 0.10,
            })
    }
}

/// Cache TTLs for the hot/warm/cold data facade (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_hot_ttl_s")]
    pub hot_ttl_s: u64,

    #[serde(default = "default_warm_ttl_s")]
    pub warm_ttl_s: u64,

    #[serde(default = "default_cold_ttl_s")]
    pub cold_ttl_s: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hot_ttl_s: default_hot_ttl_s(),
            warm_ttl_s: default_warm_ttl_s(),
            cold_ttl_s: default_cold_ttl_s(),
        }
    }
}

/// One entry in the scheduler's job table (spec §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub interval_s: u64,
}

fn default_jobs() -> Vec<JobSpec> {
    vec![
        JobSpec { name: "scan.hot".to_string(), interval_s: 900 },
        JobSpec { name: "scan.warm".to_string(), interval_s: 7_200 },
        JobSpec { name: "regime.refresh".to_string(), interval_s: 14_400 },
        JobSpec { name: "premove.hourly".to_string(), interval_s: 3_600 },
        JobSpec { name: "providers.health".to_string(), interval_s: 300 },
    ]
}

/// Root configuration for the scan engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_universe")]
    pub universe: Vec<String>,

    #[serde(default)]
    pub gates: GateConfig,

    #[serde(default)]
    pub regime: RegimeConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default = "default_jobs")]
    pub jobs: Vec<JobSpec>,

    #[serde(default = "default_scan_concurrency")]
    pub scan_concurrency: usize,

    /// Social factor is an opaque external input per spec's open question;
    /// when no feed is wired up this constant is used for every symbol.
    #[serde(default)]
    pub social_factor_default: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            universe: default_universe(),
            gates: GateConfig::default(),
            regime: RegimeConfig::default(),
            cache: CacheConfig::default(),
            jobs: default_jobs(),
            scan_concurrency: default_scan_concurrency(),
            social_factor_default: 0.0,
        }
    }
}

impl ScanConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scan config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse scan config from {}", path.display()))?;

        info!(path = %path.display(), universe_len = config.universe.len(), "scan config loaded");
        Ok(config)
    }

    /// Persist configuration to `path` using an atomic write (tmp + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise scan config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "scan config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_gates() {
        let cfg = ScanConfig::default();
        assert_eq!(cfg.gates.score_floor, 75.0);
        assert_eq!(cfg.gates.vadr_min, 1.75);
        assert_eq!(cfg.gates.vadr_min_bars, 20);
        assert_eq!(cfg.universe.len(), 5);
        assert_eq!(cfg.jobs.len(), 5);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: ScanConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.gates.score_floor, 75.0);
        assert_eq!(cfg.cache.hot_ttl_s, 15);
        assert_eq!(cfg.regime.thrust_threshold, 0.70);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "universe": ["DOGE-USD"] }"#;
        let cfg: ScanConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.universe, vec!["DOGE-USD".to_string()]);
        assert_eq!(cfg.gates.score_floor, 75.0);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = ScanConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: ScanConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.universe, cfg2.universe);
        assert_eq!(cfg.gates.score_floor, cfg2.gates.score_floor);
    }

    #[test]
    fn weight_for_regime_sums_to_one() {
        let cfg = RegimeConfig::default();
        for r in [Regime::TrendingBull, Regime::Choppy, Regime::HighVol] {
            assert!(cfg.weight_for(r).is_valid(), "{r} weights invalid");
        }
    }

    #[test]
    fn latefill_defaults_match_spec() {
        let cfg = GateConfig::default();
        assert_eq!(cfg.latefill_base_seconds, 30.0);
        assert_eq!(cfg.latefill_p99_threshold_ms, 400.0);
        assert_eq!(cfg.latefill_grace_seconds, 30.0);
        assert_eq!(cfg.latefill_grace_cooldown_minutes, 15.0);
    }

    #[test]
    fn movement_floor_matches_table() {
        let cfg = GateConfig::default();
        assert_eq!(cfg.movement_floor_for(Regime::TrendingBull), 2.5);
        assert_eq!(cfg.movement_floor_for(Regime::Choppy), 3.0);
        assert_eq!(cfg.movement_floor_for(Regime::HighVol), 4.0);
    }
}
