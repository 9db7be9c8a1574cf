// =============================================================================
// Scheduler — cron-like jobs driving scan.hot, scan.warm, regime.refresh,
// premove.hourly, providers.health (spec §4.7)
// =============================================================================
//
// Same `tokio::spawn` + `tokio::time::interval` shape the reference engine
// uses for its background loops (regime detection, reconciliation, exit
// monitor), generalized into a named job table so jobs can be registered
// declaratively from `ScanConfig::jobs` instead of hand-spawned one by one.
// Each job guards itself with a `tokio::sync::Mutex::try_lock()` so a slow
// run is never run concurrently with itself; missed ticks are not made up,
// matching `tokio::time::interval`'s default (Burst) behaviour only up to
// that one-at-a-time guard — a tick that arrives while the previous run is
// still in flight is simply skipped.
// =============================================================================

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::config::JobSpec;

/// One registered job: a name (matching `JobSpec::name`), a tick interval,
/// and an async handler. The handler receives no arguments beyond `self` in
/// the closure's captures — callers close over whatever state (facade,
/// regime detector, scanner) the job needs.
pub struct ScheduledJob {
    pub name: String,
    pub interval: Duration,
    lock: Mutex<()>,
}

impl ScheduledJob {
    pub fn new(spec: &JobSpec) -> Self {
        Self { name: spec.name.clone(), interval: Duration::from_secs(spec.interval_s), lock: Mutex::new(()) }
    }

    /// Run `handler` on every tick until `cancel` reports shutdown. Ticks
    /// that arrive while the previous invocation is still running are
    /// skipped rather than queued (one-at-a-time per job).
    pub async fn run<F, Fut>(self: Arc<Self>, mut cancel: watch::Receiver<bool>, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.lock.try_lock() {
                        Ok(_guard) => {
                            info!(job = %self.name, "job tick");
                            if let Err(e) = handler().await {
                                warn!(job = %self.name, error = %e, "job run failed");
                            }
                        }
                        Err(_) => {
                            warn!(job = %self.name, "skipping tick: previous run still in flight");
                        }
                    }
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        info!(job = %self.name, "job shutting down");
                        return;
                    }
                }
            }
        }
    }
}

/// Registry of named jobs, spawned together and shut down by a single
/// broadcast cancellation signal.
pub struct Scheduler {
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self { cancel_tx, cancel_rx, handles: Vec::new() }
    }

    /// Spawn `job` with `handler`, tracking its `JoinHandle` for `shutdown`.
    pub fn spawn<F, Fut>(&mut self, job: ScheduledJob, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let cancel_rx = self.cancel_rx.clone();
        let job = Arc::new(job);
        self.handles.push(tokio::spawn(async move {
            job.run(cancel_rx, handler).await;
        }));
    }

    /// Signal every spawned job to stop and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.cancel_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn job_runs_on_each_tick_until_cancelled() {
        let spec = JobSpec { name: "test.job".to_string(), interval_s: 0 };
        let mut scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let job = ScheduledJob::new(&spec);

        let c = counter.clone();
        scheduler.spawn(job, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown().await;

        assert!(counter.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn slow_run_skips_overlapping_tick() {
        let spec = JobSpec { name: "slow.job".to_string(), interval_s: 0 };
        let job = Arc::new(ScheduledJob::new(&spec));
        let (_tx, rx) = watch::channel(false);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let c1 = concurrent.clone();
        let m1 = max_concurrent.clone();
        let job_clone = job.clone();
        let handle = tokio::spawn(async move {
            job_clone
                .run(rx, move || {
                    let c1 = c1.clone();
                    let m1 = m1.clone();
                    async move {
                        let now = c1.fetch_add(1, Ordering::SeqCst) + 1;
                        m1.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        c1.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await;
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.abort();

        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }
}
