// =============================================================================
// Core Data Model — shared types flowing through the scan pipeline
// =============================================================================
//
// These structs are the canonical shapes described in spec §3. Every
// consumer (venues, facade, regime, factors, gates, orchestrator) passes the
// same shape rather than ad-hoc tuples or duck-typed JSON, the way
// `DecisionEnvelope`/`RegimeState` give the reference engine one struct per
// concern instead of loosely-typed maps.
// =============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

/// A canonical USD spot pair identifier, e.g. `BTC-USD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which venue produced a given datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    Kraken,
    Binance,
    Okx,
    Coinbase,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kraken => write!(f, "kraken"),
            Self::Binance => write!(f, "binance"),
            Self::Okx => write!(f, "okx"),
            Self::Coinbase => write!(f, "coinbase"),
        }
    }
}

/// Fixed preference order used by the fallback cascade (spec §4.8).
pub const VENUE_CASCADE: [Venue; 4] = [Venue::Kraken, Venue::Okx, Venue::Coinbase, Venue::Binance];

// =============================================================================
// OrderBook
// =============================================================================

/// A single price/size level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

/// An order-book snapshot for one (venue, symbol) pair at an instant.
///
/// Invariant: `asks[0].price > bids[0].price`; `seq` is monotonic per
/// (venue, symbol) between sequence-gap-triggered resyncs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub venue: Venue,
    pub symbol: Symbol,
    pub ts_ms: i64,
    pub seq: u64,
    /// Best-to-worst ordered bids.
    pub bids: Vec<PriceLevel>,
    /// Best-to-worst ordered asks.
    pub asks: Vec<PriceLevel>,
}

impl OrderBook {
    /// Midpoint of the best bid/ask, or `None` if either side is empty.
    pub fn mid(&self) -> Option<f64> {
        let bid = self.bids.first()?.price;
        let ask = self.asks.first()?.price;
        Some((bid + ask) / 2.0)
    }

    /// Spread in basis points relative to mid.
    pub fn spread_bps(&self) -> Option<f64> {
        let bid = self.bids.first()?.price;
        let ask = self.asks.first()?.price;
        let mid = (bid + ask) / 2.0;
        if mid <= 0.0 {
            return None;
        }
        Some((ask - bid) / mid * 10_000.0)
    }

    /// USD depth within `pct` of mid on both sides combined.
    pub fn depth_within_pct(&self, pct: f64) -> Option<f64> {
        let mid = self.mid()?;
        let lo = mid * (1.0 - pct / 100.0);
        let hi = mid * (1.0 + pct / 100.0);

        let bid_depth: f64 = self
            .bids
            .iter()
            .filter(|l| l.price >= lo)
            .map(|l| l.price * l.size)
            .sum();
        let ask_depth: f64 = self
            .asks
            .iter()
            .filter(|l| l.price <= hi)
            .map(|l| l.price * l.size)
            .sum();

        Some(bid_depth + ask_depth)
    }

    /// Structural validity check per spec's invariant.
    pub fn is_valid(&self) -> bool {
        match (self.bids.first(), self.asks.first()) {
            (Some(b), Some(a)) => a.price > b.price,
            _ => false,
        }
    }
}

// =============================================================================
// Trade
// =============================================================================

/// A single executed trade print from a venue's public trade feed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Trade {
    pub ts_ms: i64,
    pub price: f64,
    pub size: f64,
    pub buyer_maker: bool,
    pub seq: u64,
}

// =============================================================================
// Bar (kline)
// =============================================================================

/// A fixed-duration OHLCV candle.
///
/// Invariant: `l <= min(o,c) <= max(o,c) <= h`, `volume >= 0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    pub ts_open_ms: i64,
    pub ts_close_ms: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub volume: f64,
}

impl Bar {
    pub fn is_valid(&self) -> bool {
        let lo = self.o.min(self.c);
        let hi = self.o.max(self.c);
        self.l <= lo && lo <= hi && hi <= self.h && self.volume >= 0.0
    }
}

// =============================================================================
// FactorSet / ResidualSet
// =============================================================================

/// Per-symbol raw factors at a decision instant (spec §4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FactorSet {
    pub momentum_core: f64,
    pub technical: f64,
    pub volume: f64,
    pub quality: f64,
    pub catalyst: f64,
    pub social: f64,
}

/// The orthogonalized output of Gram-Schmidt residualization.
///
/// Invariant: `momentum_core` is bitwise-identical to the input;
/// `|social_resid_capped| <= 10`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResidualSet {
    pub momentum_core: f64,
    pub technical_resid: f64,
    pub volume_resid: f64,
    pub quality_resid: f64,
    pub catalyst_resid: f64,
    pub social_resid_capped: f64,
}

// =============================================================================
// Regime / WeightBlend
// =============================================================================

/// Market classification (spec §4.3). Three variants only — unlike the
/// reference engine's five-way `MarketRegime`, this spec pins the taxonomy
/// to exactly the three regimes the weight-blend table covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    TrendingBull,
    Choppy,
    HighVol,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrendingBull => write!(f, "trending_bull"),
            Self::Choppy => write!(f, "choppy"),
            Self::HighVol => write!(f, "high_vol"),
        }
    }
}

/// Indicators that fed a regime classification, retained for explainability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegimeIndicators {
    pub vol_7d: f64,
    pub breadth_above_ma: f64,
    pub breadth_thrust: f64,
}

/// A recomputed regime snapshot, cached between 4h detector runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeState {
    pub regime: Regime,
    pub confidence: f64,
    pub detected_at_ms: i64,
    pub indicators: RegimeIndicators,
}

/// Per-regime scoring weights. Invariant: entries sum to 1.0 +/- 1e-6, all >= 0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightBlend {
    pub w_momentum: f64,
    pub w_technical: f64,
    pub w_volume: f64,
    pub w_quality: f64,
    pub w_catalyst: f64,
}

impl WeightBlend {
    pub fn sum(&self) -> f64 {
        self.w_momentum + self.w_technical + self.w_volume + self.w_quality + self.w_catalyst
    }

    pub fn is_valid(&self) -> bool {
        (self.sum() - 1.0).abs() <= 1e-6
            && self.w_momentum >= 0.0
            && self.w_technical >= 0.0
            && self.w_volume >= 0.0
            && self.w_quality >= 0.0
            && self.w_catalyst >= 0.0
    }
}

// =============================================================================
// Gate report
// =============================================================================

/// A single gate's verdict, retained in evaluation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateOutcome {
    pub gate_name: String,
    pub passed: bool,
    pub reason: String,
    pub observed: f64,
    pub threshold: f64,
}

/// The full ordered sequence of gate verdicts for one candidate.
///
/// Invariant: if any hard gate has `passed == false`, the candidate is not
/// emitted as an entry signal, but the report itself is always retained.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateReport {
    pub hard_gates: Vec<GateOutcome>,
    pub guards: Vec<GateOutcome>,
}

impl GateReport {
    pub fn hard_passed(&self) -> bool {
        self.hard_gates.iter().all(|g| g.passed)
    }

    pub fn guards_passed(&self) -> bool {
        self.guards.iter().all(|g| g.passed)
    }

    pub fn admissible(&self) -> bool {
        self.hard_passed() && self.guards_passed()
    }
}

// =============================================================================
// Candidate
// =============================================================================

/// Source attribution for a facade-returned datum (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribution {
    pub venue: Venue,
    pub ts_ms: i64,
    pub fetched_at_ms: i64,
    pub cache_hit: bool,
    pub tier: DataTier,
    /// Set when this datum was served via the fallback cascade.
    pub fallback_from: Option<Venue>,
    /// Worst-feed-wins freshness penalty in `[0, 1]` (spec §4.2); 1.0 is
    /// fully fresh. Computed from the cache lookup's age on a hit, or 1.0 on
    /// a live fetch (age zero at the instant of attribution).
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataTier {
    Hot,
    Warm,
    Cold,
}

/// A scored symbol emitted by the scan orchestrator. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: Symbol,
    pub score: f64,
    pub rank: usize,
    pub factors: FactorSet,
    pub residuals: ResidualSet,
    pub gate_report: GateReport,
    pub regime: Regime,
    pub attribution: Attribution,
    pub timestamp_ms: i64,
}

/// A symbol that did not produce a candidate, with the reason and the stage
/// at which it was dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedSymbol {
    pub symbol: Symbol,
    pub stage: String,
    pub reason: String,
}

/// Output of one full scan pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanOutput {
    pub candidates: Vec<Candidate>,
    pub skipped: Vec<SkippedSymbol>,
    pub gate_rejected: Vec<Candidate>,
    pub partial: bool,
}

// =============================================================================
// VenueHealth
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    Proceed,
    HalveSize,
    Avoid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueHealth {
    pub venue: Venue,
    pub status: HealthStatus,
    pub p99_latency_ms: f64,
    pub error_rate: f64,
    pub reject_rate: f64,
    pub ws_connected: bool,
    pub last_heartbeat_age_s: f64,
    pub recommendation: Recommendation,
}

// =============================================================================
// PIT snapshot
// =============================================================================

/// An immutable, write-once point-in-time snapshot stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PitSnapshotMeta {
    pub symbol: Symbol,
    pub ts_ms: i64,
    pub sha256: String,
    pub record_count: usize,
    pub written_at_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_book_validity() {
        let ob = OrderBook {
            venue: Venue::Kraken,
            symbol: "BTC-USD".into(),
            ts_ms: 0,
            seq: 1,
            bids: vec![PriceLevel { price: 100.0, size: 1.0 }],
            asks: vec![PriceLevel { price: 101.0, size: 1.0 }],
        };
        assert!(ob.is_valid());
        assert_eq!(ob.mid(), Some(100.5));
    }

    #[test]
    fn order_book_crossed_is_invalid() {
        let ob = OrderBook {
            venue: Venue::Kraken,
            symbol: "BTC-USD".into(),
            ts_ms: 0,
            seq: 1,
            bids: vec![PriceLevel { price: 101.0, size: 1.0 }],
            asks: vec![PriceLevel { price: 100.0, size: 1.0 }],
        };
        assert!(!ob.is_valid());
    }

    #[test]
    fn bar_validity() {
        let b = Bar {
            ts_open_ms: 0,
            ts_close_ms: 1,
            o: 10.0,
            h: 12.0,
            l: 9.0,
            c: 11.0,
            volume: 5.0,
        };
        assert!(b.is_valid());
    }

    #[test]
    fn bar_invalid_high_below_close() {
        let b = Bar {
            ts_open_ms: 0,
            ts_close_ms: 1,
            o: 10.0,
            h: 10.5,
            l: 9.0,
            c: 11.0,
            volume: 5.0,
        };
        assert!(!b.is_valid());
    }

    #[test]
    fn weight_blend_validity() {
        let wb = WeightBlend {
            w_momentum: 0.425,
            w_technical: 0.20,
            w_volume: 0.155,
            w_quality: 0.085,
            w_catalyst: 0.135,
        };
        assert!(wb.is_valid());
    }

    #[test]
    fn weight_blend_invalid_sum() {
        let wb = WeightBlend {
            w_momentum: 0.5,
            w_technical: 0.5,
            w_volume: 0.5,
            w_quality: 0.0,
            w_catalyst: 0.0,
        };
        assert!(!wb.is_valid());
    }

    #[test]
    fn gate_report_admissible_requires_both() {
        let mut gr = GateReport::default();
        gr.hard_gates.push(GateOutcome {
            gate_name: "score_floor".into(),
            passed: true,
            reason: "ok".into(),
            observed: 80.0,
            threshold: 75.0,
        });
        assert!(gr.hard_passed());
        assert!(gr.admissible());

        gr.guards.push(GateOutcome {
            gate_name: "fatigue".into(),
            passed: false,
            reason: "fatigue_block".into(),
            observed: 1.0,
            threshold: 0.0,
        });
        assert!(!gr.guards_passed());
        assert!(!gr.admissible());
    }
}
