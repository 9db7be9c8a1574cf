// =============================================================================
// Shared WS reconnect-with-backoff driver for venue streaming subscriptions
// =============================================================================
//
// Generalizes the reference engine's `run_kline_stream`/`run_depth_stream`
// reconnect loop (currently hoisted into `main.rs`, fixed 5s retry) into a
// reusable driver with the backoff curve spec §4.1 calls for: 1s -> 60s,
// doubling, +/-20% jitter. Backoff resets once a connection has stayed up
// long enough to call the disconnect transient rather than a persistent
// outage.
// =============================================================================

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::warn;

use crate::errors::VenueError;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const STABLE_CONNECTION_THRESHOLD: Duration = Duration::from_secs(30);

/// Scale `backoff` by a random factor in `[0.8, 1.2]`.
fn jittered(backoff: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_secs_f64(backoff.as_secs_f64() * factor)
}

/// Run `connect` in a loop, reconnecting with exponential backoff whenever it
/// returns `Err`. Returns once `connect` returns `Ok(())`, which a caller
/// should treat as a clean shutdown (e.g. the receiving channel was dropped).
pub async fn run_with_reconnect<F, Fut>(label: &str, mut connect: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), VenueError>>,
{
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let attempt_start = Instant::now();
        match connect().await {
            Ok(()) => return,
            Err(e) => {
                if attempt_start.elapsed() >= STABLE_CONNECTION_THRESHOLD {
                    backoff = INITIAL_BACKOFF;
                }
                let sleep_for = jittered(backoff);
                warn!(
                    stream = label,
                    error = %e,
                    backoff_s = sleep_for.as_secs_f64(),
                    "stream disconnected, reconnecting"
                );
                tokio::time::sleep(sleep_for).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

/// Apply incremental `(price, qty)` changes to a sorted price-level side, as
/// used by venues whose book channel sends deltas rather than full snapshots
/// (Kraken's `book`, Coinbase's `level2`). `qty == 0` removes the level;
/// otherwise it is inserted or updated in place, keeping the side sorted
/// best-first (descending for bids, ascending for asks).
pub fn apply_book_delta(side: &mut Vec<crate::types::PriceLevel>, changes: Vec<(f64, f64)>, ascending: bool) {
    for (price, qty) in changes {
        side.retain(|l| l.price != price);
        if qty > 0.0 {
            side.push(crate::types::PriceLevel { price, size: qty });
        }
    }
    if ascending {
        side.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
    } else {
        side.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn stops_on_clean_return() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        run_with_reconnect("test", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_on_error_until_clean_return() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        run_with_reconnect("test", || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(VenueError::VenueUnavailable { venue: "test".to_string(), reason: "boom".to_string() })
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
