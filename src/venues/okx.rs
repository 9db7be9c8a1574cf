// =============================================================================
// OKX adapter — public candles + order-book endpoints
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
use crate::venues::stream::run_with_reconnect;
use crate::venues::VenueAdapter;

pub struct OkxAdapter {
    base_url: String,
    client: Client,
    limiter: Arc<RateLimiter>,
}

impl OkxAdapter {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        let limiter = Arc::new(RateLimiter::new("okx"));
        limiter.set_budget("candles", 40);
        limiter.set_budget("books", 40);
        limiter.set_budget("time", 40);
        limiter.set_budget("trades", 40);

        Self { base_url: "https://www.okx.com".to_string(), client, limiter }
    }

    fn timeout(elapsed: Duration) -> VenueError {
        VenueError::Timeout { venue: "okx".to_string(), elapsed_ms: elapsed.as_millis() as u64 }
    }

    fn unavailable(reason: impl Into<String>) -> VenueError {
        VenueError::VenueUnavailable { venue: "okx".to_string(), reason: reason.into() }
    }

    fn to_inst_id(symbol: &Symbol) -> String {
        let (base, quote) = symbol.as_str().split_once('-').unwrap_or((symbol.as_str(), "USD"));
        format!("{base}-{quote}T") // BTC-USDT
    }
}

impl Default for OkxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for OkxAdapter {
    fn venue(&self) -> Venue {
        Venue::Okx
    }

    #[instrument(skip(self), name = "okx::get_klines")]
    async fn get_klines(
        &self,
        symbol: &Symbol,
        interval_s: u64,
        limit: u32,
    ) -> Result<Vec<Bar>, VenueError> {
        if !self.limiter.can_send("candles", 1) {
            return Err(VenueError::RateLimited {
                venue: "okx".to_string(),
                endpoint_class: "candles".to_string(),
                retry_after_ms: 2000,
            });
        }

        let bar = match interval_s {
            60 => "1m",
            300 => "5m",
            900 => "15m",
            3600 => "1H",
            14400 => "4H",
            86400 => "1D",
            _ => "1H",
        };
        let inst_id = Self::to_inst_id(symbol);
        let url = format!(
            "{}/api/v5/market/candles?instId={}&bar={}&limit={}",
            self.base_url, inst_id, bar, limit
        );

        let start = std::time::Instant::now();
        let resp = self.client.get(&url).send().await.map_err(|_| Self::timeout(start.elapsed()))?;
        self.limiter.record_spend("candles", 1);

        if !resp.status().is_success() {
            return Err(Self::unavailable(format!("candles returned HTTP {}", resp.status())));
        }

        let body: serde_json::Value =
            resp.json().await.map_err(|e| Self::unavailable(format!("bad candles body: {e}")))?;

        if body.get("code").and_then(|v| v.as_str()) != Some("0") {
            return Err(Self::unavailable(format!("okx error payload: {body}")));
        }

        let raw = body
            .get("data")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Self::unavailable("missing data array"))?;

        let mut bars = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = match entry.as_array() {
                Some(a) if a.len() >= 6 => a,
                _ => continue,
            };
            let parse = |v: &serde_json::Value| -> f64 {
                v.as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0)
            };
            let ts_open_ms = arr[0].as_str().and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);
            bars.push(Bar {
                ts_open_ms,
                ts_close_ms: ts_open_ms,
                o: parse(&arr[1]),
                h: parse(&arr[2]),
                l: parse(&arr[3]),
                c: parse(&arr[4]),
                volume: parse(&arr[5]),
            });
        }
        // OKX returns newest-first; normalize to oldest-first like other venues.
        bars.reverse();

        debug!(symbol = %symbol, count = bars.len(), "okx klines fetched");
        Ok(bars)
    }

    #[instrument(skip(self), name = "okx::get_order_book")]
    async fn get_order_book(&self, symbol: &Symbol, depth: u32) -> Result<OrderBook, VenueError> {
        if !self.limiter.can_send("books", 1) {
            return Err(VenueError::RateLimited {
                venue: "okx".to_string(),
                endpoint_class: "books".to_string(),
                retry_after_ms: 2000,
            });
        }

        let inst_id = Self::to_inst_id(symbol);
        let url = format!("{}/api/v5/market/books?instId={}&sz={}", self.base_url, inst_id, depth);

        let start = std::time::Instant::now();
        let resp = self.client.get(&url).send().await.map_err(|_| Self::timeout(start.elapsed()))?;
        self.limiter.record_spend("books", 1);

        if !resp.status().is_success() {
            return Err(Self::unavailable(format!("books returned HTTP {}", resp.status())));
        }

        let body: serde_json::Value =
            resp.json().await.map_err(|e| Self::unavailable(format!("bad books body: {e}")))?;

        let entry = body
            .get("data")
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .ok_or_else(|| Self::unavailable("missing books data"))?;

        let parse_levels = |key: &str| -> Vec<PriceLevel> {
            entry
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

        let ts_ms = entry.get("ts").and_then(|v| v.as_str()).and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);

        Ok(OrderBook {
            venue: Venue::Okx,
            symbol: symbol.clone(),
            ts_ms,
            seq: 0,
            bids: parse_levels("bids"),
            asks: parse_levels("asks"),
        })
    }

    #[instrument(skip(self), name = "okx::ping")]
    async fn ping(&self) -> Result<(), VenueError> {
        let url = format!("{}/api/v5/public/time", self.base_url);
        let start = std::time::Instant::now();
        let resp = self.client.get(&url).send().await.map_err(|_| Self::timeout(start.elapsed()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::unavailable(format!("time returned HTTP {}", resp.status())))
        }
    }

    #[instrument(skip(self), name = "okx::get_trades")]
    async fn get_trades(&self, symbol: &Symbol, limit: u32) -> Result<Vec<Trade>, VenueError> {
        if !self.limiter.can_send("trades", 1) {
            return Err(VenueError::RateLimited {
                venue: "okx".to_string(),
                endpoint_class: "trades".to_string(),
                retry_after_ms: 2000,
            });
        }

        let inst_id = Self::to_inst_id(symbol);
        let url = format!("{}/api/v5/market/trades?instId={}&limit={}", self.base_url, inst_id, limit);

        let start = std::time::Instant::now();
        let resp = self.client.get(&url).send().await.map_err(|_| Self::timeout(start.elapsed()))?;
        self.limiter.record_spend("trades", 1);

        if !resp.status().is_success() {
            return Err(Self::unavailable(format!("trades returned HTTP {}", resp.status())));
        }

        let body: serde_json::Value =
            resp.json().await.map_err(|e| Self::unavailable(format!("bad trades body: {e}")))?;

        let raw = body
            .get("data")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Self::unavailable("missing trades data"))?;

        // OKX returns newest-first; reverse to the trait's oldest-first contract.
        let mut trades: Vec<Trade> = raw
            .iter()
            .filter_map(|e| {
                Some(Trade {
                    ts_ms: e.get("ts")?.as_str()?.parse::<i64>().ok()?,
                    price: e.get("px")?.as_str()?.parse::<f64>().ok()?,
                    size: e.get("sz")?.as_str()?.parse::<f64>().ok()?,
                    buyer_maker: e.get("side").and_then(|v| v.as_str()) == Some("sell"),
                    seq: e.get("tradeId").and_then(|v| v.as_str()).and_then(|s| s.parse::<u64>().ok()).unwrap_or(0),
                })
            })
            .collect();
        trades.reverse();

        debug!(symbol = %symbol, count = trades.len(), "okx trades fetched");
        Ok(trades)
    }

    #[instrument(skip(self, tx), name = "okx::subscribe_trades")]
    async fn subscribe_trades(&self, symbol: &Symbol, tx: mpsc::Sender<Trade>) -> Result<(), VenueError> {
        let inst_id = Self::to_inst_id(symbol);
        let subscribe_msg =
            serde_json::json!({ "op": "subscribe", "args": [{ "channel": "trades", "instId": inst_id }] })
                .to_string();

        run_with_reconnect("okx::trades", || {
            let tx = tx.clone();
            let subscribe_msg = subscribe_msg.clone();
            async move {
                let (ws, _) = connect_async("wss://ws.okx.com:8443/ws/v5/public").await.map_err(|e| {
                    VenueError::VenueUnavailable { venue: "okx".to_string(), reason: format!("trade stream connect failed: {e}") }
                })?;
                let (mut write, mut read) = ws.split();
                write.send(Message::Text(subscribe_msg)).await.map_err(|e| VenueError::VenueUnavailable {
                    venue: "okx".to_string(),
                    reason: format!("trade stream subscribe failed: {e}"),
                })?;

                while let Some(msg) = read.next().await {
                    let msg = msg.map_err(|e| VenueError::VenueUnavailable {
                        venue: "okx".to_string(),
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
                    let data = match body.get("data").and_then(|v| v.as_array()) {
                        Some(d) => d,
                        None => continue,
                    };
                    for entry in data {
                        let trade = Trade {
                            ts_ms: entry.get("ts").and_then(|v| v.as_str()).and_then(|s| s.parse::<i64>().ok()).unwrap_or(0),
                            price: entry.get("px").and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0),
                            size: entry.get("sz").and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0),
                            buyer_maker: entry.get("side").and_then(|v| v.as_str()) == Some("sell"),
                            seq: entry
                                .get("tradeId")
                                .and_then(|v| v.as_str())
                                .and_then(|s| s.parse::<u64>().ok())
                                .unwrap_or(0),
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

    #[instrument(skip(self, tx), name = "okx::subscribe_book_l2")]
    async fn subscribe_book_l2(&self, symbol: &Symbol, tx: mpsc::Sender<OrderBook>) -> Result<(), VenueError> {
        let inst_id = Self::to_inst_id(symbol);
        let subscribe_msg =
            serde_json::json!({ "op": "subscribe", "args": [{ "channel": "books5", "instId": inst_id }] })
                .to_string();
        let symbol = symbol.clone();
        let last_seq_id: Mutex<i64> = Mutex::new(-1);

        run_with_reconnect("okx::book_l2", || {
            let tx = tx.clone();
            let symbol = symbol.clone();
            let subscribe_msg = subscribe_msg.clone();
            let last_seq_id = &last_seq_id;
            async move {
                *last_seq_id.lock() = -1;

                let (ws, _) = connect_async("wss://ws.okx.com:8443/ws/v5/public").await.map_err(|e| {
                    VenueError::VenueUnavailable { venue: "okx".to_string(), reason: format!("book stream connect failed: {e}") }
                })?;
                let (mut write, mut read) = ws.split();
                write.send(Message::Text(subscribe_msg)).await.map_err(|e| VenueError::VenueUnavailable {
                    venue: "okx".to_string(),
                    reason: format!("book stream subscribe failed: {e}"),
                })?;

                while let Some(msg) = read.next().await {
                    let msg = msg.map_err(|e| VenueError::VenueUnavailable {
                        venue: "okx".to_string(),
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
                    let entry = match body.get("data").and_then(|v| v.as_array()).and_then(|a| a.first()) {
                        Some(e) => e,
                        None => continue,
                    };

                    // books5 resends a full top-5 snapshot on every message, so a
                    // non-increasing seqId only gets a warning, not a hard gap error.
                    if let Some(seq_id) = entry.get("seqId").and_then(|v| v.as_i64()) {
                        let mut prev = last_seq_id.lock();
                        if *prev >= 0 && seq_id < *prev {
                            warn!(symbol = %symbol, prev = *prev, got = seq_id, "okx books5 seqId went backwards");
                        }
                        *prev = seq_id;
                    }

                    let parse_levels = |key: &str| -> Vec<PriceLevel> {
                        entry
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

                    let ts_ms =
                        entry.get("ts").and_then(|v| v.as_str()).and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);

                    let book = OrderBook {
                        venue: Venue::Okx,
                        symbol: symbol.clone(),
                        ts_ms,
                        seq: entry.get("seqId").and_then(|v| v.as_i64()).unwrap_or(0) as u64,
                        bids: parse_levels("bids"),
                        asks: parse_levels("asks"),
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
