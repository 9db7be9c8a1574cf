// =============================================================================
// Error Taxonomy — typed errors at each subsystem boundary
// =============================================================================
//
// Every module boundary in the scan pipeline returns one of these enums
// rather than a bare `anyhow::Error`, so callers can match on the taxonomy
// from the spec (VenueUnavailable, RateLimited, StaleData, ...) instead of
// string-sniffing. `anyhow::Context` is still used one layer up, at job
// handlers and `main.rs`, to attach human-readable context.
// =============================================================================

use thiserror::Error;

/// Errors surfaced by a venue adapter (`VenueAdapter` trait implementations).
#[derive(Debug, Clone, Error)]
pub enum VenueError {
    #[error("venue {venue} unavailable: {reason}")]
    VenueUnavailable { venue: String, reason: String },

    #[error("rate limited on {venue}/{endpoint_class}, retry after {retry_after_ms}ms")]
    RateLimited {
        venue: String,
        endpoint_class: String,
        retry_after_ms: u64,
    },

    #[error("symbol {symbol} unknown on venue {venue}")]
    SymbolUnknown { venue: String, symbol: String },

    #[error("data for {symbol} on {venue} is stale (age {age_secs:.1}s >= hard limit)")]
    StaleData {
        venue: String,
        symbol: String,
        age_secs: f64,
    },

    #[error("sequence gap on {venue}/{symbol}: expected {expected}, got {got}")]
    SequenceGap {
        venue: String,
        symbol: String,
        expected: u64,
        got: u64,
    },

    #[error("{venue} request timed out after {elapsed_ms}ms")]
    Timeout { venue: String, elapsed_ms: u64 },

    #[error("non-USD pair {pair} rejected at adapter boundary")]
    NonUsdPair { pair: String },
}

/// Errors surfaced by the data facade (hot/warm/cold tier unification).
#[derive(Debug, Clone, Error)]
pub enum FacadeError {
    #[error(transparent)]
    Venue(#[from] VenueError),

    #[error("insufficient history for {symbol}: have {have} bars, need {need}")]
    InsufficientData {
        symbol: String,
        have: usize,
        need: usize,
    },

    #[error("fallback cascade exhausted for {symbol}: all venues red")]
    NoHealthyVenue { symbol: String },

    #[error("cold-tier read failed for {key}: {reason}")]
    PitReadFailed { key: String, reason: String },
}

/// Errors surfaced by the scan orchestrator at the whole-scan level.
///
/// Per-symbol failures are represented as data (`SkippedSymbol`), not as
/// this error type — `ScanError` is reserved for failures that legitimately
/// abort the entire scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan cancelled")]
    Cancelled,

    #[error("regime unavailable and no stale regime within tolerance")]
    RegimeUnavailable,

    #[error("scan exceeded deadline of {deadline_secs}s")]
    DeadlineExceeded { deadline_secs: u64 },
}

/// Configuration errors. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}
