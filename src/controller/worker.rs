//! Keyed reconciliation workers
//!
//! Each worker owns one bounded queue. Jobs are routed by node id, so all
//! work for a node runs on one worker, one job at a time.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::ControllerStats;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::types::{DirectoryEvent, DirectoryId, ErrorKind, LintelError, Result};

/// Unit of work for a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Apply a delivered directory event
    Event(DirectoryEvent),
    /// Recompute a node whose ancestor changed
    Refresh(DirectoryId),
}

impl Job {
    pub fn node(&self) -> DirectoryId {
        match self {
            Self::Event(event) => event.node_id,
            Self::Refresh(node) => *node,
        }
    }
}

/// Routes jobs to the worker that owns their node
#[derive(Clone)]
pub struct Dispatcher {
    queues: Vec<mpsc::Sender<Job>>,
    stats: Arc<ControllerStats>,
}

impl Dispatcher {
    pub fn worker_for(&self, node: DirectoryId) -> usize {
        let mut hasher = DefaultHasher::new();
        node.hash(&mut hasher);
        (hasher.finish() % self.queues.len() as u64) as usize
    }

    /// Queue a job, waiting for room (backpressure onto the subscription)
    pub async fn dispatch(&self, job: Job) -> Result<()> {
        let worker = self.worker_for(job.node());
        self.queues[worker]
            .send(job)
            .await
            .map_err(|_| LintelError::Internal(format!("worker {} queue closed", worker)))
    }

    /// Queue a fix-up job without waiting; dropped if the queue is full
    pub fn try_dispatch(&self, job: Job) {
        let worker = self.worker_for(job.node());
        match self.queues[worker].try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.stats.record_dropped();
                debug!(node = %job.node(), worker, "Worker queue full, leaving fix-up to resync");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Spawn `count` workers; returns the dispatcher and their join handles
pub fn spawn_workers(
    count: usize,
    queue_size: usize,
    engine: Arc<Reconciler>,
    stats: Arc<ControllerStats>,
    shutdown_tx: &broadcast::Sender<()>,
) -> (Dispatcher, Vec<tokio::task::JoinHandle<()>>) {
    let mut queues = Vec::with_capacity(count);
    let mut receivers = Vec::with_capacity(count);
    for _ in 0..count.max(1) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        queues.push(tx);
        receivers.push(rx);
    }

    let dispatcher = Dispatcher { queues, stats: stats.clone() };

    let handles = receivers
        .into_iter()
        .enumerate()
        .map(|(id, rx)| {
            let worker = Worker {
                id,
                engine: engine.clone(),
                dispatcher: dispatcher.clone(),
                stats: stats.clone(),
            };
            let shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(worker.run(rx, shutdown_rx))
        })
        .collect();

    (dispatcher, handles)
}

struct Worker {
    id: usize,
    engine: Arc<Reconciler>,
    dispatcher: Dispatcher,
    stats: Arc<ControllerStats>,
}

impl Worker {
    async fn run(self, mut jobs: mpsc::Receiver<Job>, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!(worker = self.id, "Worker started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                job = jobs.recv() => match job {
                    Some(job) => self.process(job).await,
                    None => break,
                }
            }
        }

        // Finish what was already accepted; nothing new arrives after shutdown
        jobs.close();
        let mut drained = 0;
        while let Some(job) = jobs.recv().await {
            self.process(job).await;
            drained += 1;
        }

        info!(worker = self.id, drained, "Worker stopped");
    }

    async fn process(&self, job: Job) {
        let node = job.node();
        let result = match &job {
            Job::Event(event) => self.engine.reconcile(event).await,
            Job::Refresh(node) => self.engine.refresh(*node).await,
        };

        match result {
            Ok(ReconcileOutcome::Skipped) => self.stats.record_skipped(),
            Ok(outcome) => {
                self.stats.record_applied(matches!(job, Job::Refresh(_)));
                for child in outcome.children() {
                    self.dispatcher.try_dispatch(Job::Refresh(*child));
                }
            }
            Err(e) => {
                self.stats.record_failed();
                match e.kind() {
                    ErrorKind::InvariantViolation => warn!(
                        worker = self.id,
                        node = %node,
                        error = %e,
                        "Invariant violation, deferring node to resync"
                    ),
                    _ => warn!(
                        worker = self.id,
                        node = %node,
                        error = %e,
                        "Reconciliation failed, deferring node to resync"
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_is_stable() {
        let (tx, _rx) = mpsc::channel(1);
        let dispatcher = Dispatcher {
            queues: vec![tx.clone(), tx.clone(), tx],
            stats: Arc::new(ControllerStats::default()),
        };

        let node = DirectoryId::from_u128(42);
        let first = dispatcher.worker_for(node);
        assert!(first < 3);
        assert_eq!(dispatcher.worker_for(node), first);
    }

    #[tokio::test]
    async fn test_full_queue_drops_fixup() {
        let (tx, _rx) = mpsc::channel(1);
        let stats = Arc::new(ControllerStats::default());
        let dispatcher = Dispatcher { queues: vec![tx], stats: stats.clone() };

        dispatcher.try_dispatch(Job::Refresh(DirectoryId::from_u128(1)));
        dispatcher.try_dispatch(Job::Refresh(DirectoryId::from_u128(2)));

        assert_eq!(stats.snapshot().dropped_fixups, 1);
    }
}
