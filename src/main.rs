// =============================================================================
// CryptoRun Scanner — Main Entry Point
// =============================================================================
//
// Boots the data facade, venue adapters, regime detector and the scan
// orchestrator, then registers the five named jobs from `ScanConfig::jobs`
// on the scheduler. Ctrl+C triggers a coordinated shutdown across every job.
// =============================================================================

mod config;
mod errors;
mod facade;
mod factors;
mod gates;
mod health;
mod orchestrator;
mod regime;
mod scheduler;
mod scoring;
mod types;
mod venues;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ScanConfig;
use crate::facade::DataFacade;
use crate::health::VenueHealthTracker;
use crate::orchestrator::{Scanner, SymbolContext};
use crate::regime::RegimeDetector;
use crate::scheduler::{ScheduledJob, Scheduler};
use crate::types::{RegimeIndicators, Symbol, Venue, VENUE_CASCADE};
use crate::venues::VenueAdapter;

fn build_adapters() -> HashMap<Venue, Arc<dyn VenueAdapter>> {
    let mut adapters: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
    adapters.insert(Venue::Kraken, Arc::new(venues::kraken::KrakenAdapter::new()));
    adapters.insert(Venue::Binance, Arc::new(venues::binance::BinanceAdapter::new()));
    adapters.insert(Venue::Okx, Arc::new(venues::okx::OkxAdapter::new()));
    adapters.insert(Venue::Coinbase, Arc::new(venues::coinbase::CoinbaseAdapter::new()));
    adapters
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("CryptoRun scanner starting up");

    let config = ScanConfig::load("scan_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load scan config, using defaults");
        ScanConfig::default()
    });

    info!(universe_len = config.universe.len(), jobs = config.jobs.len(), "scan config loaded");

    let health = Arc::new(VenueHealthTracker::new());
    for venue in VENUE_CASCADE {
        health.record_heartbeat(venue, true);
    }

    let facade = Arc::new(DataFacade::new(
        build_adapters(),
        health.clone(),
        Duration::from_secs(config.cache.hot_ttl_s),
        Duration::from_secs(config.cache.warm_ttl_s),
    ));

    let regime_detector = RegimeDetector::new();
    // Seed an initial regime so the first scan doesn't abort on cold start.
    regime_detector.detect(
        RegimeIndicators { vol_7d: 0.15, breadth_above_ma: 0.5, breadth_thrust: 0.5 },
        config.regime.thrust_threshold,
        chrono::Utc::now().timestamp_millis(),
    );

    let scanner = Arc::new(Scanner::new(facade.clone(), regime_detector.clone(), config.clone()));
    let universe: Vec<Symbol> = config.universe.iter().map(|s| Symbol::new(s.clone())).collect();

    let mut scheduler = Scheduler::new();

    for job_spec in &config.jobs {
        let job = ScheduledJob::new(job_spec);

        match job_spec.name.as_str() {
            "scan.hot" | "scan.warm" => {
                let scanner = scanner.clone();
                let facade = facade.clone();
                let universe = universe.clone();
                let interval_s = if job_spec.name == "scan.hot" { 3600 } else { 14_400 };

                scheduler.spawn(job, move || {
                    let scanner = scanner.clone();
                    let facade = facade.clone();
                    let universe = universe.clone();
                    async move {
                        // adv_usd, funding_z, market_cap_tier and the catalyst
                        // fields have no wired-in data source yet (no ADV feed,
                        // no funding-rate venue, no market-cap or catalyst
                        // calendar integration) and stay at neutral defaults
                        // until one is added. obv_slope and price_direction_sign
                        // are derived per-symbol inside the pipeline from
                        // fetched bars, not supplied here.
                        let contexts: Vec<SymbolContext> = universe
                            .iter()
                            .map(|s| SymbolContext {
                                symbol: s.clone(),
                                adv_usd: 10_000_000.0,
                                funding_z: None,
                                market_cap_tier: 0.7,
                                catalyst_event_score: 0.0,
                                catalyst_event_age_s: 0.0,
                                history: Vec::new(),
                            })
                            .collect();

                        let (_tx, rx) = tokio::sync::watch::channel(false);
                        let facade_for_ctx = facade.clone();
                        let output = scanner
                            .scan(contexts, chrono::Utc::now().timestamp_millis(), rx, move |symbol| {
                                let facade = facade_for_ctx.clone();
                                async move {
                                    let (h1, _) = facade
                                        .get_bars(&symbol, 3600, 30)
                                        .await
                                        .map_err(|e| e.to_string())?;
                                    let (h4, _) = facade
                                        .get_bars(&symbol, 14_400, 30)
                                        .await
                                        .map_err(|e| e.to_string())?;
                                    let (h12, _) = facade
                                        .get_bars(&symbol, 43_200, 30)
                                        .await
                                        .map_err(|e| e.to_string())?;
                                    let (h24, _) = facade
                                        .get_bars(&symbol, 86_400, 30)
                                        .await
                                        .map_err(|e| e.to_string())?;
                                    Ok(crate::factors::engine::TimeframeBars { h1, h4, h12, h24, d7: vec![] })
                                }
                            })
                            .await?;

                        info!(
                            job = "scan",
                            candidates = output.candidates.len(),
                            gate_rejected = output.gate_rejected.len(),
                            skipped = output.skipped.len(),
                            partial = output.partial,
                            "scan complete"
                        );
                        let _ = interval_s;
                        Ok(())
                    }
                });
            }
            "regime.refresh" => {
                let detector = regime_detector.clone();
                let thrust_threshold = config.regime.thrust_threshold;
                scheduler.spawn(job, move || {
                    let detector = detector.clone();
                    async move {
                        // Breadth inputs are sourced externally per the spec's
                        // open question; a flat neutral reading keeps the
                        // detector ticking when no breadth feed is wired in.
                        detector.detect(
                            RegimeIndicators { vol_7d: 0.15, breadth_above_ma: 0.5, breadth_thrust: 0.5 },
                            thrust_threshold,
                            chrono::Utc::now().timestamp_millis(),
                        );
                        Ok(())
                    }
                });
            }
            "providers.health" => {
                let health = health.clone();
                scheduler.spawn(job, move || {
                    let health = health.clone();
                    async move {
                        for venue in VENUE_CASCADE {
                            let status = health.status(venue);
                            info!(venue = %venue, status = ?status.status, "venue health");
                        }
                        Ok(())
                    }
                });
            }
            "premove.hourly" => {
                // The pre-movement detector pipeline has no concrete algorithm
                // in the scan spec to ground an implementation on (see
                // DESIGN.md's open questions); the job stays registered and
                // ticks on schedule but performs no work yet.
                scheduler.spawn(job, move || async move {
                    warn!(job = "premove.hourly", "pre-movement detector not implemented, job is a scheduled no-op");
                    Ok(())
                });
            }
            other => {
                let name = other.to_string();
                scheduler.spawn(job, move || {
                    let name = name.clone();
                    async move {
                        warn!(job = %name, "unrecognized job name in config, no handler wired, skipping");
                        Ok(())
                    }
                });
            }
        }
    }

    info!("all scheduled jobs running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping jobs");
    scheduler.shutdown().await;

    info!("CryptoRun scanner shut down complete");
    Ok(())
}
