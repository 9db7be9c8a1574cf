// =============================================================================
// Kraken adapter — public OHLC + order-book endpoints
// =============================================================================
//
// Kraken is the head of the fallback cascade (spec §4.8), so this adapter
// gets the same treatment as the reference engine's primary exchange client:
// one `reqwest::Client`, one `RateLimiter`, `#[instrument]` on every call.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, instrument, warn};

use crate::errors::VenueError;
use crate::types::{Bar, OrderBook, PriceLevel, Symbol, Trade, Venue};
use crate::venues::rate_limit::RateLimiter;
use crate::venues::stream::{apply_book_delta, run_with_reconnect};
use crate::venues::{to_venue_pair, VenueAdapter};

pub struct KrakenAdapter {
    base_url: String,
    client: Client,
    limiter: Arc<RateLimiter>,
}

impl KrakenAdapter {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        let limiter = Arc::new(RateLimiter::new("kraken"));
        limiter.set_budget("ohlc", 15);
        limiter.set_budget("depth", 15);
        limiter.set_budget("time", 15);
        limiter.set_budget("trades", 15);

        Self { base_url: "https://api.kraken.com".to_string(), client, limiter }
    }

    /// Kraken's public WS v2 API addresses symbols as `BASE/QUOTE`, unlike
    /// the concatenated REST pair format `to_venue_pair` produces.
    fn to_ws_symbol(symbol: &Symbol) -> String {
        let (base, quote) = symbol.as_str().split_once('-').unwrap_or((symbol.as_str(), "USD"));
        format!("{base}/{quote}")
    }

    fn timeout(elapsed: Duration) -> VenueError {
        VenueError::Timeout { venue: "kraken".to_string(), elapsed_ms: elapsed.as_millis() as u64 }
    }

    fn unavailable(reason: impl Into<String>) -> VenueError {
        VenueError::VenueUnavailable { venue: "kraken".to_string(), reason: reason.into() }
    }

    fn check_kraken_errors(body: &serde_json::Value) -> Result<(), VenueError> {
        if let Some(errs) = body.get("error").and_then(|v| v.as_array()) {
            if !errs.is_empty() {
                return Err(Self::unavailable(format!("kraken error payload: {errs:?}")));
            }
        }
        Ok(())
    }
}

impl Default for KrakenAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for KrakenAdapter {
    fn venue(&self) -> Venue {
        Venue::Kraken
    }

    #[instrument(skip(self), name = "kraken::get_klines")]
    async fn get_klines(
        &self,
        symbol: &Symbol,
        interval_s: u64,
        _limit: u32,
    ) -> Result<Vec<Bar>, VenueError> {
        if !self.limiter.can_send("ohlc", 1) {
            return Err(VenueError::RateLimited {
                venue: "kraken".to_string(),
                endpoint_class: "ohlc".to_string(),
                retry_after_ms: 3000,
            });
        }

        let pair = to_venue_pair(Venue::Kraken, symbol);
        let interval_min = (interval_s / 60).max(1);
        let url = format!(
            "{}/0/public/OHLC?pair={}&interval={}",
            self.base_url, pair, interval_min
        );

        let start = std::time::Instant::now();
        let resp = self.client.get(&url).send().await.map_err(|_| Self::timeout(start.elapsed()))?;
        self.limiter.record_spend("ohlc", 1);

        if !resp.status().is_success() {
            return Err(Self::unavailable(format!("OHLC returned HTTP {}", resp.status())));
        }

        let body: serde_json::Value =
            resp.json().await.map_err(|e| Self::unavailable(format!("bad OHLC body: {e}")))?;
        Self::check_kraken_errors(&body)?;

        let result = body.get("result").ok_or_else(|| Self::unavailable("missing result"))?;
        let series = result
            .as_object()
            .and_then(|obj| obj.iter().find(|(k, _)| *k != "last"))
            .map(|(_, v)| v)
            .ok_or_else(|| Self::unavailable("no series in OHLC result"))?;

        let raw = series.as_array().ok_or_else(|| Self::unavailable("OHLC series not an array"))?;

        let mut bars = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = match entry.as_array() {
                Some(a) if a.len() >= 7 => a,
                _ => continue,
            };
            let ts_open_ms = arr[0].as_i64().unwrap_or(0) * 1000;
            let parse = |v: &serde_json::Value| -> f64 {
                v.as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0)
            };
            bars.push(Bar {
                ts_open_ms,
                ts_close_ms: ts_open_ms + (interval_min as i64 * 60_000),
                o: parse(&arr[1]),
                h: parse(&arr[2]),
                l: parse(&arr[3]),
                c: parse(&arr[4]),
                volume: parse(&arr[6]),
            });
        }

        debug!(symbol = %symbol, count = bars.len(), "kraken klines fetched");
        Ok(bars)
    }

    #[instrument(skip(self), name = "kraken::get_order_book")]
    async fn get_order_book(&self, symbol: &Symbol, depth: u32) -> Result<OrderBook, VenueError> {
        if !self.limiter.can_send("depth", 1) {
            return Err(VenueError::RateLimited {
                venue: "kraken".to_string(),
                endpoint_class: "depth".to_string(),
                retry_after_ms: 3000,
            });
        }

        let pair = to_venue_pair(Venue::Kraken, symbol);
        let url = format!("{}/0/public/Depth?pair={}&count={}", self.base_url, pair, depth);

        let start = std::time::Instant::now();
        let resp = self.client.get(&url).send().await.map_err(|_| Self::timeout(start.elapsed()))?;
        self.limiter.record_spend("depth", 1);

        if !resp.status().is_success() {
            return Err(Self::unavailable(format!("Depth returned HTTP {}", resp.status())));
        }

        let body: serde_json::Value =
            resp.json().await.map_err(|e| Self::unavailable(format!("bad Depth body: {e}")))?;
        Self::check_kraken_errors(&body)?;

        let result = body.get("result").ok_or_else(|| Self::unavailable("missing result"))?;
        let pair_book = result
            .as_object()
            .and_then(|obj| obj.values().next())
            .ok_or_else(|| Self::unavailable("no pair book in Depth result"))?;

        let parse_levels = |key: &str| -> Vec<PriceLevel> {
            pair_book
                .get(key)
                .and_then(|v| v.as_array())
                .map(|levels| {
                    levels
                        .iter()
                        .filter_map(|l| {
                            let a = l.as_array()?;
                            let price = a.first()?.as_str()?.parse::<f64>().ok()?;
                            let size = a.get(1)?.as_str()?.parse::<f64>().ok()?;
                            Some(PriceLevel { price, size })
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(OrderBook {
            venue: Venue::Kraken,
            symbol: symbol.clone(),
            ts_ms: chrono::Utc::now().timestamp_millis(),
            seq: 0,
            bids: parse_levels("bids"),
            asks: parse_levels("asks"),
        })
    }

    #[instrument(skip(self), name = "kraken::ping")]
    async fn ping(&self) -> Result<(), VenueError> {
        let url = format!("{}/0/public/Time", self.base_url);
        let start = std::time::Instant::now();
        let resp = self.client.get(&url).send().await.map_err(|_| Self::timeout(start.elapsed()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::unavailable(format!("Time returned HTTP {}", resp.status())))
        }
    }

    #[instrument(skip(self), name = "kraken::get_trades")]
    async fn get_trades(&self, symbol: &Symbol, limit: u32) -> Result<Vec<Trade>, VenueError> {
        if !self.limiter.can_send("trades", 1) {
            return Err(VenueError::RateLimited {
                venue: "kraken".to_string(),
                endpoint_class: "trades".to_string(),
                retry_after_ms: 3000,
            });
        }

        let pair = to_venue_pair(Venue::Kraken, symbol);
        let url = format!("{}/0/public/Trades?pair={}", self.base_url, pair);

        let start = std::time::Instant::now();
        let resp = self.client.get(&url).send().await.map_err(|_| Self::timeout(start.elapsed()))?;
        self.limiter.record_spend("trades", 1);

        if !resp.status().is_success() {
            return Err(Self::unavailable(format!("Trades returned HTTP {}", resp.status())));
        }

        let body: serde_json::Value =
            resp.json().await.map_err(|e| Self::unavailable(format!("bad Trades body: {e}")))?;
        Self::check_kraken_errors(&body)?;

        let result = body.get("result").ok_or_else(|| Self::unavailable("missing result"))?;
        let series = result
            .as_object()
            .and_then(|obj| obj.iter().find(|(k, _)| *k != "last"))
            .map(|(_, v)| v)
            .ok_or_else(|| Self::unavailable("no series in Trades result"))?;

        let raw = series.as_array().ok_or_else(|| Self::unavailable("Trades series not an array"))?;
        let parse = |v: &serde_json::Value| -> f64 {
            v.as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0)
        };

        let trim_from = raw.len().saturating_sub(limit as usize);
        let trades = raw[trim_from..]
            .iter()
            .filter_map(|entry| {
                let a = entry.as_array()?;
                if a.len() < 4 {
                    return None;
                }
                Some(Trade {
                    ts_ms: (parse(&a[2]) * 1000.0) as i64,
                    price: parse(&a[0]),
                    size: parse(&a[1]),
                    buyer_maker: a[3].as_str() == Some("s"),
                    seq: 0,
                })
            })
            .collect();

        debug!(symbol = %symbol, "kraken trades fetched");
        Ok(trades)
    }

    #[instrument(skip(self, tx), name = "kraken::subscribe_trades")]
    async fn subscribe_trades(&self, symbol: &Symbol, tx: mpsc::Sender<Trade>) -> Result<(), VenueError> {
        let ws_symbol = Self::to_ws_symbol(symbol);
        let subscribe_msg = serde_json::json!({
            "method": "subscribe",
            "params": { "channel": "trade", "symbol": [ws_symbol] },
        })
        .to_string();

        run_with_reconnect("kraken::trades", || {
            let tx = tx.clone();
            let subscribe_msg = subscribe_msg.clone();
            async move {
                let (ws, _) = connect_async("wss://ws.kraken.com/v2").await.map_err(|e| {
                    VenueError::VenueUnavailable { venue: "kraken".to_string(), reason: format!("trade stream connect failed: {e}") }
                })?;
                let (mut write, mut read) = ws.split();
                write.send(Message::Text(subscribe_msg)).await.map_err(|e| VenueError::VenueUnavailable {
                    venue: "kraken".to_string(),
                    reason: format!("trade stream subscribe failed: {e}"),
                })?;

                while let Some(msg) = read.next().await {
                    let msg = msg.map_err(|e| VenueError::VenueUnavailable {
                        venue: "kraken".to_string(),
                        reason: format!("trade stream read error: {e}"),
                    })?;
                    let text = match msg {
                        Message::Text(t) => t,
                        _ => continue,
                    };
                    let body: serde_json::Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if body.get("channel").and_then(|v| v.as_str()) != Some("trade") {
                        continue;
                    }
                    let Some(data) = body.get("data").and_then(|v| v.as_array()) else { continue };
                    for entry in data {
                        let trade = Trade {
                            ts_ms: entry
                                .get("timestamp")
                                .and_then(|v| v.as_str())
                                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                                .map(|dt| dt.timestamp_millis())
                                .unwrap_or(0),
                            price: entry.get("price").and_then(|v| v.as_f64()).unwrap_or(0.0),
                            size: entry.get("qty").and_then(|v| v.as_f64()).unwrap_or(0.0),
                            buyer_maker: entry.get("side").and_then(|v| v.as_str()) == Some("sell"),
                            seq: entry.get("trade_id").and_then(|v| v.as_u64()).unwrap_or(0),
                        };
                        if tx.send(trade).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                Ok(())
            }
        })
        .await;
        Ok(())
    }

    #[instrument(skip(self, tx), name = "kraken::subscribe_book_l2")]
    async fn subscribe_book_l2(&self, symbol: &Symbol, tx: mpsc::Sender<OrderBook>) -> Result<(), VenueError> {
        let ws_symbol = Self::to_ws_symbol(symbol);
        let subscribe_msg = serde_json::json!({
            "method": "subscribe",
            "params": { "channel": "book", "symbol": [ws_symbol], "depth": 25 },
        })
        .to_string();
        let symbol = symbol.clone();
        let have_snapshot = Mutex::new(false);

        run_with_reconnect("kraken::book_l2", || {
            let tx = tx.clone();
            let symbol = symbol.clone();
            let subscribe_msg = subscribe_msg.clone();
            let have_snapshot = &have_snapshot;
            async move {
                *have_snapshot.lock() = false;

                let (ws, _) = connect_async("wss://ws.kraken.com/v2").await.map_err(|e| {
                    VenueError::VenueUnavailable { venue: "kraken".to_string(), reason: format!("book stream connect failed: {e}") }
                })?;
                let (mut write, mut read) = ws.split();
                write.send(Message::Text(subscribe_msg)).await.map_err(|e| VenueError::VenueUnavailable {
                    venue: "kraken".to_string(),
                    reason: format!("book stream subscribe failed: {e}"),
                })?;

                let mut bids: Vec<PriceLevel> = Vec::new();
                let mut asks: Vec<PriceLevel> = Vec::new();

                while let Some(msg) = read.next().await {
                    let msg = msg.map_err(|e| VenueError::VenueUnavailable {
                        venue: "kraken".to_string(),
                        reason: format!("book stream read error: {e}"),
                    })?;
                    let text = match msg {
                        Message::Text(t) => t,
                        _ => continue,
                    };
                    let body: serde_json::Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if body.get("channel").and_then(|v| v.as_str()) != Some("book") {
                        continue;
                    }
                    let Some(entry) = body.get("data").and_then(|v| v.as_array()).and_then(|a| a.first()) else {
                        continue;
                    };
                    let msg_type = body.get("type").and_then(|v| v.as_str()).unwrap_or("");

                    let parse_levels = |key: &str| -> Vec<(f64, f64)> {
                        entry
                            .get(key)
                            .and_then(|v| v.as_array())
                            .map(|levels| {
                                levels
                                    .iter()
                                    .filter_map(|l| {
                                        let price = l.get("price")?.as_f64()?;
                                        let qty = l.get("qty")?.as_f64()?;
                                        Some((price, qty))
                                    })
                                    .collect()
                            })
                            .unwrap_or_default()
                    };

                    match msg_type {
                        "snapshot" => {
                            let already_had_one = {
                                let mut flag = have_snapshot.lock();
                                let prev = *flag;
                                *flag = true;
                                prev
                            };
                            if already_had_one {
                                warn!(symbol = %symbol, "kraken resent a book snapshot mid-stream, treating as a sequence gap");
                                return Err(VenueError::SequenceGap {
                                    venue: "kraken".to_string(),
                                    symbol: symbol.as_str().to_string(),
                                    expected: bids.len() as u64 + asks.len() as u64,
                                    got: 0,
                                });
                            }
                            bids = parse_levels("bids").into_iter().map(|(price, size)| PriceLevel { price, size }).collect();
                            asks = parse_levels("asks").into_iter().map(|(price, size)| PriceLevel { price, size }).collect();
                        }
                        "update" => {
                            if !*have_snapshot.lock() {
                                return Err(VenueError::SequenceGap {
                                    venue: "kraken".to_string(),
                                    symbol: symbol.as_str().to_string(),
                                    expected: 0,
                                    got: 0,
                                });
                            }
                            apply_book_delta(&mut bids, parse_levels("bids"), false);
                            apply_book_delta(&mut asks, parse_levels("asks"), true);
                        }
                        _ => continue,
                    }

                    let book = OrderBook {
                        venue: Venue::Kraken,
                        symbol: symbol.clone(),
                        ts_ms: chrono::Utc::now().timestamp_millis(),
                        seq: 0,
                        bids: bids.clone(),
                        asks: asks.clone(),
                    };
                    if tx.send(book).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(())
            }
        })
        .await;
        Ok(())
    }
}
