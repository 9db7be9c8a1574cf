// =============================================================================
// Coinbase adapter — public candles + order-book endpoints
// =============================================================================
//
// Coinbase is last in the fallback cascade (spec §4.8) — tried only once
// kraken, okx, and coinbase... wait, coinbase is third; binance is last.
// Kept as a full adapter regardless since the cascade order is config, not
// code, and tests exercise every venue uniformly.
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
use crate::venues::VenueAdapter;

pub struct CoinbaseAdapter {
    base_url: String,
    client: Client,
    limiter: Arc<RateLimiter>,
}

impl CoinbaseAdapter {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        let limiter = Arc::new(RateLimiter::new("coinbase"));
        limiter.set_budget("candles", 10);
        limiter.set_budget("book", 10);
        limiter.set_budget("time", 10);
        limiter.set_budget("trades", 10);

        Self { base_url: "https://api.exchange.coinbase.com".to_string(), client, limiter }
    }

    fn timeout(elapsed: Duration) -> VenueError {
        VenueError::Timeout { venue: "coinbase".to_string(), elapsed_ms: elapsed.as_millis() as u64 }
    }

    fn unavailable(reason: impl Into<String>) -> VenueError {
        VenueError::VenueUnavailable { venue: "coinbase".to_string(), reason: reason.into() }
    }
}

impl Default for CoinbaseAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for CoinbaseAdapter {
    fn venue(&self) -> Venue {
        Venue::Coinbase
    }

    #[instrument(skip(self), name = "coinbase::get_klines")]
    async fn get_klines(
        &self,
        symbol: &Symbol,
        interval_s: u64,
        _limit: u32,
    ) -> Result<Vec<Bar>, VenueError> {
        if !self.limiter.can_send("candles", 1) {
            return Err(VenueError::RateLimited {
                venue: "coinbase".to_string(),
                endpoint_class: "candles".to_string(),
                retry_after_ms: 2000,
            });
        }

        let product_id = symbol.as_str();
        let granularity = match interval_s {
            60 | 300 | 900 | 3600 | 21600 | 86400 => interval_s,
            _ => 3600,
        };
        let url = format!(
            "{}/products/{}/candles?granularity={}",
            self.base_url, product_id, granularity
        );

        let start = std::time::Instant::now();
        let resp = self.client.get(&url).send().await.map_err(|_| Self::timeout(start.elapsed()))?;
        self.limiter.record_spend("candles", 1);

        if !resp.status().is_success() {
            return Err(Self::unavailable(format!("candles returned HTTP {}", resp.status())));
        }

        let raw: Vec<Vec<f64>> =
            resp.json().await.map_err(|e| Self::unavailable(format!("bad candles body: {e}")))?;

        let mut bars: Vec<Bar> = raw
            .into_iter()
            .filter(|row| row.len() >= 6)
            .map(|row| {
                let ts_open_ms = (row[0] as i64) * 1000;
                Bar {
                    ts_open_ms,
                    ts_close_ms: ts_open_ms + (granularity as i64 * 1000),
                    o: row[3],
                    h: row[2],
                    l: row[1],
                    c: row[4],
                    volume: row[5],
                }
            })
            .collect();
        // Coinbase returns newest-first.
        bars.reverse();

        debug!(symbol = %symbol, count = bars.len(), "coinbase klines fetched");
        Ok(bars)
    }

    #[instrument(skip(self), name = "coinbase::get_order_book")]
    async fn get_order_book(&self, symbol: &Symbol, _depth: u32) -> Result<OrderBook, VenueError> {
        if !self.limiter.can_send("book", 1) {
            return Err(VenueError::RateLimited {
                venue: "coinbase".to_string(),
                endpoint_class: "book".to_string(),
                retry_after_ms: 2000,
            });
        }

        let product_id = symbol.as_str();
        let url = format!("{}/products/{}/book?level=2", self.base_url, product_id);

        let start = std::time::Instant::now();
        let resp = self.client.get(&url).send().await.map_err(|_| Self::timeout(start.elapsed()))?;
        self.limiter.record_spend("book", 1);

        if !resp.status().is_success() {
            return Err(Self::unavailable(format!("book returned HTTP {}", resp.status())));
        }

        let body: serde_json::Value =
            resp.json().await.map_err(|e| Self::unavailable(format!("bad book body: {e}")))?;

        let parse_levels = |key: &str| -> Vec<PriceLevel> {
            body.get(key)
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
            venue: Venue::Coinbase,
            symbol: symbol.clone(),
            ts_ms: chrono::Utc::now().timestamp_millis(),
            seq: body.get("sequence").and_then(|v| v.as_u64()).unwrap_or(0),
            bids: parse_levels("bids"),
            asks: parse_levels("asks"),
        })
    }

    #[instrument(skip(self), name = "coinbase::ping")]
    async fn ping(&self) -> Result<(), VenueError> {
        let url = format!("{}/time", self.base_url);
        let start = std::time::Instant::now();
        let resp = self.client.get(&url).send().await.map_err(|_| Self::timeout(start.elapsed()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::unavailable(format!("time returned HTTP {}", resp.status())))
        }
    }

    #[instrument(skip(self), name = "coinbase::get_trades")]
    async fn get_trades(&self, symbol: &Symbol, limit: u32) -> Result<Vec<Trade>, VenueError> {
        if !self.limiter.can_send("trades", 1) {
            return Err(VenueError::RateLimited {
                venue: "coinbase".to_string(),
                endpoint_class: "trades".to_string(),
                retry_after_ms: 2000,
            });
        }

        let product_id = symbol.as_str();
        let url = format!("{}/products/{}/trades?limit={}", self.base_url, product_id, limit);

        let start = std::time::Instant::now();
        let resp = self.client.get(&url).send().await.map_err(|_| Self::timeout(start.elapsed()))?;
        self.limiter.record_spend("trades", 1);

        if !resp.status().is_success() {
            return Err(Self::unavailable(format!("trades returned HTTP {}", resp.status())));
        }

        let raw: Vec<serde_json::Value> =
            resp.json().await.map_err(|e| Self::unavailable(format!("bad trades body: {e}")))?;

        // Coinbase returns newest-first; reverse to the trait's oldest-first contract.
        let mut trades: Vec<Trade> = raw
            .iter()
            .filter_map(|e| {
                Some(Trade {
                    ts_ms: e
                        .get("time")?
                        .as_str()
                        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                        .map(|dt| dt.timestamp_millis())?,
                    price: e.get("price")?.as_str()?.parse::<f64>().ok()?,
                    size: e.get("size")?.as_str()?.parse::<f64>().ok()?,
                    buyer_maker: e.get("side").and_then(|v| v.as_str()) == Some("sell"),
                    seq: e.get("trade_id").and_then(|v| v.as_u64()).unwrap_or(0),
                })
            })
            .collect();
        trades.reverse();

        debug!(symbol = %symbol, count = trades.len(), "coinbase trades fetched");
        Ok(trades)
    }

    #[instrument(skip(self, tx), name = "coinbase::subscribe_trades")]
    async fn subscribe_trades(&self, symbol: &Symbol, tx: mpsc::Sender<Trade>) -> Result<(), VenueError> {
        let product_id = symbol.as_str().to_string();
        let subscribe_msg =
            serde_json::json!({ "type": "subscribe", "product_ids": [product_id], "channels": ["matches"] })
                .to_string();

        run_with_reconnect("coinbase::trades", || {
            let tx = tx.clone();
            let subscribe_msg = subscribe_msg.clone();
            async move {
                let (ws, _) = connect_async("wss://ws-feed.exchange.coinbase.com").await.map_err(|e| {
                    VenueError::VenueUnavailable { venue: "coinbase".to_string(), reason: format!("trade stream connect failed: {e}") }
                })?;
                let (mut write, mut read) = ws.split();
                write.send(Message::Text(subscribe_msg)).await.map_err(|e| VenueError::VenueUnavailable {
                    venue: "coinbase".to_string(),
                    reason: format!("trade stream subscribe failed: {e}"),
                })?;

                while let Some(msg) = read.next().await {
                    let msg = msg.map_err(|e| VenueError::VenueUnavailable {
                        venue: "coinbase".to_string(),
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
                    if body.get("type").and_then(|v| v.as_str()) != Some("match") {
                        continue;
                    }
                    let trade = Trade {
                        ts_ms: body
                            .get("time")
                            .and_then(|v| v.as_str())
                            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                            .map(|dt| dt.timestamp_millis())
                            .unwrap_or(0),
                        price: body.get("price").and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0),
                        size: body.get("size").and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0),
                        buyer_maker: body.get("side").and_then(|v| v.as_str()) == Some("sell"),
                        seq: body.get("trade_id").and_then(|v| v.as_u64()).unwrap_or(0),
                    };
                    if tx.send(trade).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(())
            }
        })
        .await;
        Ok(())
    }

    #[instrument(skip(self, tx), name = "coinbase::subscribe_book_l2")]
    async fn subscribe_book_l2(&self, symbol: &Symbol, tx: mpsc::Sender<OrderBook>) -> Result<(), VenueError> {
        let product_id = symbol.as_str().to_string();
        let subscribe_msg =
            serde_json::json!({ "type": "subscribe", "product_ids": [product_id], "channels": ["level2"] })
                .to_string();
        let symbol = symbol.clone();
        let have_snapshot = Mutex::new(false);

        run_with_reconnect("coinbase::book_l2", || {
            let tx = tx.clone();
            let symbol = symbol.clone();
            let subscribe_msg = subscribe_msg.clone();
            let have_snapshot = &have_snapshot;
            async move {
                *have_snapshot.lock() = false;

                let (ws, _) = connect_async("wss://ws-feed.exchange.coinbase.com").await.map_err(|e| {
                    VenueError::VenueUnavailable { venue: "coinbase".to_string(), reason: format!("book stream connect failed: {e}") }
                })?;
                let (mut write, mut read) = ws.split();
                write.send(Message::Text(subscribe_msg)).await.map_err(|e| VenueError::VenueUnavailable {
                    venue: "coinbase".to_string(),
                    reason: format!("book stream subscribe failed: {e}"),
                })?;

                let mut bids: Vec<PriceLevel> = Vec::new();
                let mut asks: Vec<PriceLevel> = Vec::new();

                while let Some(msg) = read.next().await {
                    let msg = msg.map_err(|e| VenueError::VenueUnavailable {
                        venue: "coinbase".to_string(),
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
                    let msg_type = body.get("type").and_then(|v| v.as_str()).unwrap_or("");

                    match msg_type {
                        "snapshot" => {
                            let already_had_one = {
                                let mut flag = have_snapshot.lock();
                                let prev = *flag;
                                *flag = true;
                                prev
                            };
                            if already_had_one {
                                warn!(symbol = %symbol, "coinbase resent a book snapshot mid-stream, treating as a sequence gap");
                                return Err(VenueError::SequenceGap {
                                    venue: "coinbase".to_string(),
                                    symbol: symbol.as_str().to_string(),
                                    expected: bids.len() as u64 + asks.len() as u64,
                                    got: 0,
                                });
                            }
                            let parse_side = |key: &str| -> Vec<PriceLevel> {
                                body.get(key)
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
                            bids = parse_side("bids");
                            asks = parse_side("asks");
                        }
                        "l2update" => {
                            if !*have_snapshot.lock() {
                                return Err(VenueError::SequenceGap {
                                    venue: "coinbase".to_string(),
                                    symbol: symbol.as_str().to_string(),
                                    expected: 0,
                                    got: 0,
                                });
                            }
                            let changes = match body.get("changes").and_then(|v| v.as_array()) {
                                Some(c) => c,
                                None => continue,
                            };
                            let mut bid_changes = Vec::new();
                            let mut ask_changes = Vec::new();
                            for change in changes {
                                let c = match change.as_array() {
                                    Some(c) if c.len() >= 3 => c,
                                    _ => continue,
                                };
                                let side = c[0].as_str().unwrap_or("");
                                let price = c[1].as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
                                let qty = c[2].as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
                                if side == "buy" {
                                    bid_changes.push((price, qty));
                                } else {
                                    ask_changes.push((price, qty));
                                }
                            }
                            apply_book_delta(&mut bids, bid_changes, false);
                            apply_book_delta(&mut asks, ask_changes, true);
                        }
                        _ => continue,
                    }

                    let book = OrderBook {
                        venue: Venue::Coinbase,
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
