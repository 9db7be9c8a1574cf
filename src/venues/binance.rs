// =============================================================================
// Binance adapter — public klines + order-book endpoints only
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, instrument, warn};

use crate::errors::VenueError;
use crate::types::{Bar, OrderBook, PriceLevel, Symbol, Trade, Venue};
use crate::venues::rate_limit::RateLimiter;
use crate::venues::stream::run_with_reconnect;
use crate::venues::{to_venue_pair, VenueAdapter};

pub struct BinanceAdapter {
    base_url: String,
    client: Client,
    limiter: Arc<RateLimiter>,
}

impl BinanceAdapter {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        let limiter = Arc::new(RateLimiter::new("binance"));
        limiter.set_budget("klines", 1000);
        limiter.set_budget("depth", 1000);
        limiter.set_budget("ping", 1000);
        limiter.set_budget("trades", 1000);

        Self {
            base_url: "https://api.binance.com".to_string(),
            client,
            limiter,
        }
    }

    fn timeout(elapsed: Duration) -> VenueError {
        VenueError::Timeout {
            venue: "binance".to_string(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    fn parse_str_f64(v: &serde_json::Value) -> Result<f64, VenueError> {
        v.as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| v.as_f64())
            .ok_or_else(|| VenueError::VenueUnavailable {
                venue: "binance".to_string(),
                reason: "unparseable numeric field in response".to_string(),
            })
    }
}

impl Default for BinanceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for BinanceAdapter {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    #[instrument(skip(self), name = "binance::get_klines")]
    async fn get_klines(
        &self,
        symbol: &Symbol,
        interval_s: u64,
        limit: u32,
    ) -> Result<Vec<Bar>, VenueError> {
        if !self.limiter.can_send("klines", 1) {
            return Err(VenueError::RateLimited {
                venue: "binance".to_string(),
                endpoint_class: "klines".to_string(),
                retry_after_ms: 1000,
            });
        }

        let pair = to_venue_pair(Venue::Binance, symbol);
        let interval = match interval_s {
            60 => "1m",
            300 => "5m",
            900 => "15m",
            3600 => "1h",
            14400 => "4h",
            86400 => "1d",
            other => {
                warn!(interval_s = other, "non-standard interval, defaulting to 1h");
                "1h"
            }
        };

        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, pair, interval, limit
        );

        let start = std::time::Instant::now();
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|_| Self::timeout(start.elapsed()))?;

        self.limiter.record_spend("klines", 1);

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(VenueError::RateLimited {
                venue: "binance".to_string(),
                endpoint_class: "klines".to_string(),
                retry_after_ms: 1000,
            });
        }
        if !status.is_success() {
            return Err(VenueError::VenueUnavailable {
                venue: "binance".to_string(),
                reason: format!("klines returned HTTP {status}"),
            });
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| VenueError::VenueUnavailable {
            venue: "binance".to_string(),
            reason: format!("failed to parse klines body: {e}"),
        })?;

        let raw = body.as_array().ok_or_else(|| VenueError::VenueUnavailable {
            venue: "binance".to_string(),
            reason: "klines response is not an array".to_string(),
        })?;

        let mut bars = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = match entry.as_array() {
                Some(a) if a.len() >= 7 => a,
                _ => continue,
            };
            let ts_open_ms = arr[0].as_i64().unwrap_or(0);
            let o = Self::parse_str_f64(&arr[1])?;
            let h = Self::parse_str_f64(&arr[2])?;
            let l = Self::parse_str_f64(&arr[3])?;
            let c = Self::parse_str_f64(&arr[4])?;
            let volume = Self::parse_str_f64(&arr[5])?;
            let ts_close_ms = arr[6].as_i64().unwrap_or(ts_open_ms);

            bars.push(Bar { ts_open_ms, ts_close_ms, o, h, l, c, volume });
        }

        debug!(symbol = %symbol, count = bars.len(), "binance klines fetched");
        Ok(bars)
    }

    #[instrument(skip(self), name = "binance::get_order_book")]
    async fn get_order_book(&self, symbol: &Symbol, depth: u32) -> Result<OrderBook, VenueError> {
        if !self.limiter.can_send("depth", 1) {
            return Err(VenueError::RateLimited {
                venue: "binance".to_string(),
                endpoint_class: "depth".to_string(),
                retry_after_ms: 1000,
            });
        }

        let pair = to_venue_pair(Venue::Binance, symbol);
        let url = format!("{}/api/v3/depth?symbol={}&limit={}", self.base_url, pair, depth);

        let start = std::time::Instant::now();
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|_| Self::timeout(start.elapsed()))?;
        self.limiter.record_spend("depth", 1);

        if !resp.status().is_success() {
            return Err(VenueError::VenueUnavailable {
                venue: "binance".to_string(),
                reason: format!("depth returned HTTP {}", resp.status()),
            });
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| VenueError::VenueUnavailable {
            venue: "binance".to_string(),
            reason: format!("failed to parse depth body: {e}"),
        })?;

        let parse_levels = |key: &str| -> Vec<PriceLevel> {
            body.get(key)
                .and_then(|v| v.as_array())
                .map(|levels| {
                    levels
                        .iter()
                        .filter_map(|l| {
                            let a = l.as_array()?;
                            let price = Self::parse_str_f64(a.first()?).ok()?;
                            let size = Self::parse_str_f64(a.get(1)?).ok()?;
                            Some(PriceLevel { price, size })
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(OrderBook {
            venue: Venue::Binance,
            symbol: symbol.clone(),
            ts_ms: chrono::Utc::now().timestamp_millis(),
            seq: body.get("lastUpdateId").and_then(|v| v.as_u64()).unwrap_or(0),
            bids: parse_levels("bids"),
            asks: parse_levels("asks"),
        })
    }

    #[instrument(skip(self), name = "binance::ping")]
    async fn ping(&self) -> Result<(), VenueError> {
        let url = format!("{}/api/v3/ping", self.base_url);
        let start = std::time::Instant::now();
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|_| Self::timeout(start.elapsed()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(VenueError::VenueUnavailable {
                venue: "binance".to_string(),
                reason: format!("ping returned HTTP {}", resp.status()),
            })
        }
    }

    #[instrument(skip(self), name = "binance::get_trades")]
    async fn get_trades(&self, symbol: &Symbol, limit: u32) -> Result<Vec<Trade>, VenueError> {
        if !self.limiter.can_send("trades", 1) {
            return Err(VenueError::RateLimited {
                venue: "binance".to_string(),
                endpoint_class: "trades".to_string(),
                retry_after_ms: 1000,
            });
        }

        let pair = to_venue_pair(Venue::Binance, symbol);
        let url = format!("{}/api/v3/trades?symbol={}&limit={}", self.base_url, pair, limit);

        let start = std::time::Instant::now();
        let resp = self.client.get(&url).send().await.map_err(|_| Self::timeout(start.elapsed()))?;
        self.limiter.record_spend("trades", 1);

        if !resp.status().is_success() {
            return Err(VenueError::VenueUnavailable {
                venue: "binance".to_string(),
                reason: format!("trades returned HTTP {}", resp.status()),
            });
        }

        let raw: Vec<serde_json::Value> = resp.json().await.map_err(|e| VenueError::VenueUnavailable {
            venue: "binance".to_string(),
            reason: format!("failed to parse trades body: {e}"),
        })?;

        let trades = raw
            .iter()
            .filter_map(|t| {
                Some(Trade {
                    ts_ms: t.get("time")?.as_i64()?,
                    price: Self::parse_str_f64(t.get("price")?).ok()?,
                    size: Self::parse_str_f64(t.get("qty")?).ok()?,
                    buyer_maker: t.get("isBuyerMaker").and_then(|v| v.as_bool()).unwrap_or(false),
                    seq: t.get("id").and_then(|v| v.as_u64()).unwrap_or(0),
                })
            })
            .collect();

        Ok(trades)
    }

    #[instrument(skip(self, tx), name = "binance::subscribe_trades")]
    async fn subscribe_trades(&self, symbol: &Symbol, tx: mpsc::Sender<Trade>) -> Result<(), VenueError> {
        let pair = to_venue_pair(Venue::Binance, symbol).to_lowercase();
        let url = format!("wss://stream.binance.com:9443/ws/{pair}@trade");

        run_with_reconnect("binance::trades", || {
            let url = url.clone();
            let tx = tx.clone();
            async move {
                let (ws, _) = connect_async(&url).await.map_err(|e| VenueError::VenueUnavailable {
                    venue: "binance".to_string(),
                    reason: format!("trade stream connect failed: {e}"),
                })?;
                let (_write, mut read) = ws.split();
                while let Some(msg) = read.next().await {
                    let msg = msg.map_err(|e| VenueError::VenueUnavailable {
                        venue: "binance".to_string(),
                        reason: format!("trade stream read error: {e}"),
                    })?;
                    let text = match msg {
                        Message::Text(t) => t,
                        _ => continue,
                    };
                    let v: serde_json::Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    let trade = Trade {
                        ts_ms: v.get("T").and_then(|x| x.as_i64()).unwrap_or(0),
                        price: v.get("p").and_then(|x| x.as_str()).and_then(|s| s.parse().ok()).unwrap_or(0.0),
                        size: v.get("q").and_then(|x| x.as_str()).and_then(|s| s.parse().ok()).unwrap_or(0.0),
                        buyer_maker: v.get("m").and_then(|x| x.as_bool()).unwrap_or(false),
                        seq: v.get("t").and_then(|x| x.as_u64()).unwrap_or(0),
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

    #[instrument(skip(self, tx), name = "binance::subscribe_book_l2")]
    async fn subscribe_book_l2(&self, symbol: &Symbol, tx: mpsc::Sender<OrderBook>) -> Result<(), VenueError> {
        let pair = to_venue_pair(Venue::Binance, symbol).to_lowercase();
        let url = format!("wss://stream.binance.com:9443/ws/{pair}@depth20@100ms");
        let symbol = symbol.clone();
        let last_update_id = parking_lot::Mutex::new(0u64);

        run_with_reconnect("binance::book_l2", || {
            let url = url.clone();
            let tx = tx.clone();
            let symbol = symbol.clone();
            let last_update_id = &last_update_id;
            async move {
                let (ws, _) = connect_async(&url).await.map_err(|e| VenueError::VenueUnavailable {
                    venue: "binance".to_string(),
                    reason: format!("book stream connect failed: {e}"),
                })?;
                let (_write, mut read) = ws.split();
                while let Some(msg) = read.next().await {
                    let msg = msg.map_err(|e| VenueError::VenueUnavailable {
                        venue: "binance".to_string(),
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

                    let update_id = body.get("lastUpdateId").and_then(|v| v.as_u64()).unwrap_or(0);
                    {
                        let mut last = last_update_id.lock();
                        if *last != 0 && update_id <= *last {
                            warn!(symbol = %symbol, "binance partial-depth stream sent a non-increasing lastUpdateId");
                        }
                        *last = update_id;
                    }

                    let parse_levels = |key: &str| -> Vec<PriceLevel> {
                        body.get(key)
                            .and_then(|v| v.as_array())
                            .map(|levels| {
                                levels
                                    .iter()
                                    .filter_map(|l| {
                                        let a = l.as_array()?;
                                        let price = Self::parse_str_f64(a.first()?).ok()?;
                                        let size = Self::parse_str_f64(a.get(1)?).ok()?;
                                        Some(PriceLevel { price, size })
                                    })
                                    .collect()
                            })
                            .unwrap_or_default()
                    };

                    let book = OrderBook {
                        venue: Venue::Binance,
                        symbol: symbol.clone(),
                        ts_ms: chrono::Utc::now().timestamp_millis(),
                        seq: update_id,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_mapping_known_values() {
        assert_eq!(to_venue_pair(Venue::Binance, &Symbol::new("ETH-USD")), "ETHUSDT");
    }
}
