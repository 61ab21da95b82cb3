//! Controller Loop
//!
//! Owns the subscription lifecycle and the reconciler's workers:
//!
//! 1. Spawns keyed workers and the resync task (full resync at startup, then
//!    on a fixed interval).
//! 2. Subscribes to directory events and hands each one to the worker that
//!    owns its node.
//! 3. Re-subscribes with exponential backoff when the stream breaks; gives up
//!    with `Fatal` after too many consecutive failures.
//! 4. On shutdown stops reading events, lets workers finish what they have
//!    accepted, and returns.

pub mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{sleep, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::nats::DirectoryWatcher;
use crate::reconciler::{Reconciler, RetryPolicy};
use crate::types::{LintelError, Result};

pub use worker::{Dispatcher, Job};

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Subject carrying directory events
    pub subject: String,
    pub worker_count: usize,
    /// Bounded queue per worker
    pub queue_size: usize,
    pub resync_interval: Duration,
    /// Initial delay before re-subscribing; doubles per consecutive failure
    pub resubscribe_delay: Duration,
    pub max_resubscribe_delay: Duration,
    /// Consecutive subscribe failures before giving up (0 = never)
    pub max_resubscribe_attempts: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            subject: "events.directories".to_string(),
            worker_count: 4,
            queue_size: 256,
            resync_interval: Duration::from_secs(300),
            resubscribe_delay: Duration::from_millis(500),
            max_resubscribe_delay: Duration::from_secs(30),
            max_resubscribe_attempts: 10,
        }
    }
}

impl ControllerConfig {
    fn resubscribe_backoff(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_resubscribe_attempts,
            base_delay: self.resubscribe_delay,
            max_delay: self.max_resubscribe_delay,
        }
    }
}

/// Counters for work done by the controller
#[derive(Debug, Default)]
pub struct ControllerStats {
    events_received: AtomicU64,
    applied: AtomicU64,
    refreshed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    dropped_fixups: AtomicU64,
    resyncs: AtomicU64,
    subscriptions: AtomicU64,
}

/// Point-in-time copy of [`ControllerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub events_received: u64,
    /// Event jobs that wrote or confirmed a node's state
    pub applied: u64,
    /// Fix-up jobs completed
    pub refreshed: u64,
    /// Duplicate or stale events
    pub skipped: u64,
    /// Jobs deferred to resync after an error
    pub failed: u64,
    pub dropped_fixups: u64,
    pub resyncs: u64,
    pub subscriptions: u64,
}

impl StatsSnapshot {
    /// Jobs that reached a terminal state
    pub fn processed(&self) -> u64 {
        self.applied + self.refreshed + self.skipped + self.failed
    }
}

impl ControllerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            refreshed: self.refreshed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped_fixups: self.dropped_fixups.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
        }
    }

    fn record_applied(&self, refresh: bool) {
        if refresh {
            self.refreshed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.applied.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.dropped_fixups.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Controller {
    engine: Arc<Reconciler>,
    watcher: Arc<dyn DirectoryWatcher>,
    config: ControllerConfig,
    stats: Arc<ControllerStats>,
    shutdown_tx: broadcast::Sender<()>,
    stopping: AtomicBool,
}

impl Controller {
    pub fn new(
        engine: Arc<Reconciler>,
        watcher: Arc<dyn DirectoryWatcher>,
        config: ControllerConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            engine,
            watcher,
            config,
            stats: Arc::new(ControllerStats::default()),
            shutdown_tx,
            stopping: AtomicBool::new(false),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Run until shutdown (`Ok`) or until the subscription cannot be restored (`Fatal`)
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if self.is_stopping() {
            return Ok(());
        }

        info!(
            subject = %self.config.subject,
            workers = self.config.worker_count,
            queue_size = self.config.queue_size,
            resync_interval_secs = self.config.resync_interval.as_secs(),
            "Controller starting"
        );

        let (dispatcher, workers) = worker::spawn_workers(
            self.config.worker_count,
            self.config.queue_size,
            self.engine.clone(),
            self.stats.clone(),
            &self.shutdown_tx,
        );
        let resync = tokio::spawn(resync_loop(
            self.engine.clone(),
            self.config.resync_interval,
            self.stats.clone(),
            self.shutdown_tx.subscribe(),
        ));

        let result = self.event_loop(&dispatcher, &mut shutdown_rx).await;

        // Stop workers and the resync task whether we exit cleanly or not
        let _ = self.shutdown_tx.send(());
        drop(dispatcher);
        for handle in workers {
            if let Err(e) = handle.await {
                error!("Worker task failed: {}", e);
            }
        }
        if let Err(e) = resync.await {
            error!("Resync task failed: {}", e);
        }

        info!("Controller stopped");
        result
    }

    async fn event_loop(
        &self,
        dispatcher: &Dispatcher,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        let backoff = self.config.resubscribe_backoff();
        let mut failures = 0u32;

        loop {
            if self.is_stopping() {
                return Ok(());
            }

            let mut subscription = match self.watcher.subscribe(&self.config.subject).await {
                Ok(subscription) => {
                    failures = 0;
                    self.stats.subscriptions.fetch_add(1, Ordering::Relaxed);
                    subscription
                }
                Err(e) => {
                    failures += 1;
                    if backoff.max_attempts > 0 && failures >= backoff.max_attempts {
                        error!(
                            subject = %self.config.subject,
                            attempts = failures,
                            error = %e,
                            "Giving up on directory event subscription"
                        );
                        return Err(LintelError::Fatal(format!(
                            "could not subscribe to {} after {} attempts: {}",
                            self.config.subject, failures, e
                        )));
                    }

                    let delay = backoff.delay_for(failures);
                    warn!(attempt = failures, delay_ms = delay.as_millis() as u64, error = %e, "Subscribe failed, retrying");
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = shutdown_rx.recv() => return Ok(()),
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Shutdown received, no longer accepting events");
                        subscription.cancel();
                        return Ok(());
                    }
                    item = subscription.next() => match item {
                        Some(Ok(event)) => {
                            self.stats.events_received.fetch_add(1, Ordering::Relaxed);
                            if let Err(e) = dispatcher.dispatch(Job::Event(event)).await {
                                // Workers close their queues once shutdown is signalled
                                if self.is_stopping() {
                                    info!("Shutdown during dispatch, dropping event");
                                    subscription.cancel();
                                    return Ok(());
                                }
                                return Err(e);
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Directory event stream broke");
                            break;
                        }
                        None => {
                            warn!("Directory event stream closed");
                            break;
                        }
                    }
                }
            }

            // Pause before re-subscribing so a flapping source cannot spin us
            tokio::select! {
                _ = sleep(backoff.base_delay) => {}
                _ = shutdown_rx.recv() => return Ok(()),
            }
        }
    }
}

/// Full resync at startup, then every `interval`
async fn resync_loop(
    engine: Arc<Reconciler>,
    interval: Duration,
    stats: Arc<ControllerStats>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    result = engine.full_resync() => {
                        stats.resyncs.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = result {
                            warn!(error = %e, "Full resync failed, will retry next interval");
                        }
                    }
                }
            }
        }
    }

    info!("Resync task stopped");
}

/// Spawn the controller as a background task
pub fn spawn_controller(
    controller: Controller,
) -> (Arc<Controller>, tokio::task::JoinHandle<Result<()>>) {
    let controller = Arc::new(controller);
    let controller_clone = controller.clone();

    let handle = tokio::spawn(async move { controller_clone.run().await });

    (controller, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.queue_size, 256);
        assert_eq!(config.max_resubscribe_attempts, 10);
    }

    #[test]
    fn test_resubscribe_backoff() {
        let config = ControllerConfig::default();
        let backoff = config.resubscribe_backoff();
        assert_eq!(backoff.delay_for(1), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(20), Duration::from_secs(30));
    }

    #[test]
    fn test_snapshot_processed() {
        let stats = ControllerStats::default();
        stats.record_applied(false);
        stats.record_applied(true);
        stats.record_skipped();
        stats.record_failed();
        assert_eq!(stats.snapshot().processed(), 4);
    }
}
