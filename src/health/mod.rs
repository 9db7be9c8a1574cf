// =============================================================================
// Venue health tracker — rolling window status + fallback cascade
// =============================================================================
//
// Each venue gets a rolling 60s window of (timestamp, outcome) pairs behind
// an `RwLock`, the same concurrency shape as `AppState`'s shared fields in
// the reference engine, generalized from flat atomic counters to a window
// because the health status genuinely needs to decay old samples rather
// than accumulate forever.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::warn;

use crate::types::{HealthStatus, Recommendation, Venue, VenueHealth, VENUE_CASCADE};

const WINDOW: Duration = Duration::from_secs(60);

/// Thresholds for mapping a venue's rolling stats to a status (spec §4.8).
const GREEN_LATENCY_MS: f64 = 1000.0;
const GREEN_ERROR_RATE: f64 = 0.01;
const GREEN_HEARTBEAT_AGE_S: f64 = 5.0;
const YELLOW_LATENCY_MS: f64 = 2000.0;
const YELLOW_ERROR_RATE: f64 = 0.03;
const YELLOW_HEARTBEAT_AGE_S: f64 = 10.0;
const WS_DISCONNECTED_RED_S: f64 = 30.0;

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success { latency_ms: f64 },
    Error,
    Reject,
}

struct VenueWindow {
    samples: VecDeque<(Instant, Outcome)>,
    ws_connected: bool,
    last_heartbeat: Instant,
}

impl VenueWindow {
    fn new(now: Instant) -> Self {
        Self { samples: VecDeque::new(), ws_connected: true, last_heartbeat: now }
    }

    fn prune(&mut self, now: Instant) {
        while let Some((ts, _)) = self.samples.front() {
            if now.saturating_duration_since(*ts) > WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

pub struct VenueHealthTracker {
    windows: RwLock<HashMap<Venue, VenueWindow>>,
}

impl VenueHealthTracker {
    pub fn new() -> Self {
        let mut windows = HashMap::new();
        let now = Instant::now();
        for v in VENUE_CASCADE {
            windows.insert(v, VenueWindow::new(now));
        }
        Self { windows: RwLock::new(windows) }
    }

    pub fn record_success(&self, venue: Venue, latency_ms: f64) {
        self.record_at(venue, Outcome::Success { latency_ms }, Instant::now());
    }

    pub fn record_error(&self, venue: Venue) {
        self.record_at(venue, Outcome::Error, Instant::now());
    }

    pub fn record_reject(&self, venue: Venue) {
        self.record_at(venue, Outcome::Reject, Instant::now());
    }

    pub fn record_heartbeat(&self, venue: Venue, ws_connected: bool) {
        let mut windows = self.windows.write();
        let w = windows.entry(venue).or_insert_with(|| VenueWindow::new(Instant::now()));
        w.ws_connected = ws_connected;
        w.last_heartbeat = Instant::now();
    }

    fn record_at(&self, venue: Venue, outcome: Outcome, now: Instant) {
        let mut windows = self.windows.write();
        let w = windows.entry(venue).or_insert_with(|| VenueWindow::new(now));
        w.prune(now);
        w.samples.push_back((now, outcome));
    }

    /// Compute the current health snapshot for `venue`.
    pub fn status(&self, venue: Venue) -> VenueHealth {
        self.status_at(venue, Instant::now())
    }

    fn status_at(&self, venue: Venue, now: Instant) -> VenueHealth {
        let mut windows = self.windows.write();
        let w = windows.entry(venue).or_insert_with(|| VenueWindow::new(now));
        w.prune(now);

        let total = w.samples.len().max(1) as f64;
        let mut errors = 0usize;
        let mut rejects = 0usize;
        let mut latencies: Vec<f64> = Vec::new();

        for (_, outcome) in &w.samples {
            match outcome {
                Outcome::Success { latency_ms } => latencies.push(*latency_ms),
                Outcome::Error => errors += 1,
                Outcome::Reject => rejects += 1,
            }
        }

        let error_rate = errors as f64 / total;
        let reject_rate = rejects as f64 / total;
        let p99_latency_ms = percentile(&latencies, 0.99);
        let last_heartbeat_age_s = now.saturating_duration_since(w.last_heartbeat).as_secs_f64();

        let status = classify(error_rate, p99_latency_ms, w.ws_connected, last_heartbeat_age_s);
        let recommendation = match status {
            HealthStatus::Green => Recommendation::Proceed,
            HealthStatus::Yellow => Recommendation::HalveSize,
            HealthStatus::Red => Recommendation::Avoid,
        };

        VenueHealth {
            venue,
            status,
            p99_latency_ms,
            error_rate,
            reject_rate,
            ws_connected: w.ws_connected,
            last_heartbeat_age_s,
            recommendation,
        }
    }

    /// Return the first venue in the fallback cascade that is not Red.
    pub fn first_healthy(&self) -> Option<Venue> {
        for v in VENUE_CASCADE {
            if self.status(v).status != HealthStatus::Red {
                return Some(v);
            }
        }
        warn!("fallback cascade exhausted: every venue is red");
        None
    }

    /// The next venue in the cascade after `from`, skipping red venues.
    pub fn next_healthy_after(&self, from: Venue) -> Option<Venue> {
        let pos = VENUE_CASCADE.iter().position(|v| *v == from)?;
        VENUE_CASCADE
            .iter()
            .skip(pos + 1)
            .copied()
            .find(|v| self.status(*v).status != HealthStatus::Red)
    }
}

impl Default for VenueHealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(error_rate: f64, p99_latency_ms: f64, ws_connected: bool, heartbeat_age_s: f64) -> HealthStatus {
    if !ws_connected || heartbeat_age_s > WS_DISCONNECTED_RED_S {
        return HealthStatus::Red;
    }
    if p99_latency_ms <= GREEN_LATENCY_MS
        && error_rate <= GREEN_ERROR_RATE
        && heartbeat_age_s <= GREEN_HEARTBEAT_AGE_S
    {
        return HealthStatus::Green;
    }
    if p99_latency_ms <= YELLOW_LATENCY_MS
        && error_rate <= YELLOW_ERROR_RATE
        && heartbeat_age_s <= YELLOW_HEARTBEAT_AGE_S
    {
        return HealthStatus::Yellow;
    }
    HealthStatus::Red
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tracker_reports_green() {
        let tracker = VenueHealthTracker::new();
        let status = tracker.status(Venue::Kraken);
        assert_eq!(status.status, HealthStatus::Green);
        assert_eq!(status.recommendation, Recommendation::Proceed);
    }

    #[test]
    fn high_error_rate_becomes_red() {
        let tracker = VenueHealthTracker::new();
        for _ in 0..10 {
            tracker.record_error(Venue::Binance);
        }
        let status = tracker.status(Venue::Binance);
        assert_eq!(status.status, HealthStatus::Red);
    }

    #[test]
    fn moderate_error_rate_becomes_yellow() {
        let tracker = VenueHealthTracker::new();
        // 1 error in 50 samples = 2% error rate: above green's 1% but within yellow's 3%.
        tracker.record_error(Venue::Okx);
        for _ in 0..49 {
            tracker.record_success(Venue::Okx, 50.0);
        }
        let status = tracker.status(Venue::Okx);
        assert_eq!(status.status, HealthStatus::Yellow);
    }

    #[test]
    fn disconnected_ws_forces_red() {
        let tracker = VenueHealthTracker::new();
        tracker.record_heartbeat(Venue::Coinbase, false);
        let status = tracker.status(Venue::Coinbase);
        assert_eq!(status.status, HealthStatus::Red);
    }

    #[test]
    fn cascade_skips_red_venues() {
        let tracker = VenueHealthTracker::new();
        for _ in 0..10 {
            tracker.record_error(Venue::Kraken);
        }
        assert_eq!(tracker.first_healthy(), Some(Venue::Okx));
    }

    #[test]
    fn cascade_exhausted_returns_none() {
        let tracker = VenueHealthTracker::new();
        for v in VENUE_CASCADE {
            for _ in 0..10 {
                tracker.record_error(v);
            }
        }
        assert_eq!(tracker.first_healthy(), None);
    }
}
