// =============================================================================
// Venue adapters — unified trait over kraken/binance/okx/coinbase REST APIs
// =============================================================================
//
// Every adapter is a thin `reqwest::Client` wrapper in the shape of
// `BinanceClient`: public, keyless endpoints only (no signing — this is a
// read-only scanner, not an execution engine), one `RateLimiter` per venue,
// and `#[instrument]` tracing on every network call.
// =============================================================================

pub mod binance;
pub mod coinbase;
pub mod kraken;
pub mod okx;
pub mod rate_limit;
pub mod stream;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::VenueError;
use crate::types::{Bar, OrderBook, Symbol, Trade, Venue};

/// Capability set every venue adapter must implement: `{SubscribeTrades,
/// SubscribeBookL2, GetKlines, GetTrades, GetBookL2, Health}` (spec §4.1).
///
/// The facade (and the health tracker) program against this trait, never
/// against a concrete adapter, so the fallback cascade can swap venues
/// without the caller knowing which one answered. The streaming and
/// `get_trades`/`health` methods default to a non-panicking "unsupported" or
/// REST-derived behavior so adapters that only need REST (and test stubs)
/// don't have to implement every capability.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    /// Fetch up to `limit` most recent closed bars of `interval` duration.
    async fn get_klines(
        &self,
        symbol: &Symbol,
        interval_s: u64,
        limit: u32,
    ) -> Result<Vec<Bar>, VenueError>;

    /// Fetch a current order-book snapshot, at most `depth` levels per side.
    async fn get_order_book(&self, symbol: &Symbol, depth: u32) -> Result<OrderBook, VenueError>;

    /// Cheap liveness probe used by the health tracker; should hit the
    /// venue's lightest public endpoint (e.g. server time).
    async fn ping(&self) -> Result<(), VenueError>;

    /// Fetch the most recent public trades, oldest-first.
    async fn get_trades(&self, symbol: &Symbol, limit: u32) -> Result<Vec<Trade>, VenueError> {
        let _ = (symbol, limit);
        Err(VenueError::VenueUnavailable {
            venue: self.venue().to_string(),
            reason: "get_trades not implemented for this adapter".to_string(),
        })
    }

    /// Same snapshot as `get_order_book`, named to match the capability set's
    /// `GetBookL2`.
    async fn get_book_l2(&self, symbol: &Symbol, depth: u32) -> Result<OrderBook, VenueError> {
        self.get_order_book(symbol, depth).await
    }

    /// Health read derived from `ping`'s round-trip latency. Adapters with a
    /// cheaper or more accurate signal can override this.
    async fn health(&self) -> Result<Duration, VenueError> {
        let start = Instant::now();
        self.ping().await?;
        Ok(start.elapsed())
    }

    /// Stream public trades into `tx` until the channel closes or the
    /// connection fails unrecoverably; reconnects with backoff internally
    /// (spec §4.1: 1s -> 60s, doubling, +/-20% jitter).
    async fn subscribe_trades(&self, symbol: &Symbol, tx: mpsc::Sender<Trade>) -> Result<(), VenueError> {
        let _ = (symbol, tx);
        Err(VenueError::VenueUnavailable {
            venue: self.venue().to_string(),
            reason: "trade streaming not implemented for this adapter".to_string(),
        })
    }

    /// Stream order-book snapshots/updates into `tx`, same reconnect contract
    /// as `subscribe_trades`. Implementations that detect a sequence gap
    /// return `VenueError::SequenceGap` so the caller can REST-backfill.
    async fn subscribe_book_l2(&self, symbol: &Symbol, tx: mpsc::Sender<OrderBook>) -> Result<(), VenueError> {
        let _ = (symbol, tx);
        Err(VenueError::VenueUnavailable {
            venue: self.venue().to_string(),
            reason: "book streaming not implemented for this adapter".to_string(),
        })
    }
}

/// Translate a canonical `Symbol` (`BTC-USD`) into a venue-native pair string.
pub fn to_venue_pair(venue: Venue, symbol: &Symbol) -> String {
    let (base, quote) = split_usd_pair(symbol);
    match venue {
        Venue::Binance => format!("{base}{quote}T"), // BTCUSDT
        Venue::Kraken => format!("{base}{quote}"),   // BTCUSD (kraken normalizes XBT internally)
        Venue::Okx => format!("{base}-{quote}"),     // BTC-USD
        Venue::Coinbase => format!("{base}-{quote}"), // BTC-USD
    }
}

fn split_usd_pair(symbol: &Symbol) -> (&str, &str) {
    symbol
        .as_str()
        .split_once('-')
        .unwrap_or((symbol.as_str(), "USD"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_translation_per_venue() {
        let sym = Symbol::new("BTC-USD");
        assert_eq!(to_venue_pair(Venue::Binance, &sym), "BTCUSDT");
        assert_eq!(to_venue_pair(Venue::Kraken, &sym), "BTCUSD");
        assert_eq!(to_venue_pair(Venue::Okx, &sym), "BTC-USD");
        assert_eq!(to_venue_pair(Venue::Coinbase, &sym), "BTC-USD");
    }
}
