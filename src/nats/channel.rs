//! In-process directory event source
//!
//! Events published before anyone subscribes are held and delivered to the
//! next subscriber. Connection loss and subscribe failures can be simulated.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{DirectoryWatcher, EventSubscription};
use crate::types::{DirectoryEvent, LintelError, Result};

#[derive(Default)]
struct ChannelState {
    sender: Option<mpsc::Sender<Result<DirectoryEvent>>>,
    pending: VecDeque<DirectoryEvent>,
}

pub struct ChannelWatcher {
    state: Mutex<ChannelState>,
    capacity: usize,
    failures: AtomicU32,
    subscriptions: AtomicUsize,
}

impl ChannelWatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ChannelState::default()),
            capacity: capacity.max(1),
            failures: AtomicU32::new(0),
            subscriptions: AtomicUsize::new(0),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ChannelState) -> T) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| LintelError::Internal(format!("Lock poisoned: {}", e)))?;
        Ok(f(&mut state))
    }

    /// Deliver an event to the current subscriber, or hold it until one arrives
    pub async fn publish(&self, event: DirectoryEvent) -> Result<()> {
        let sender = self.with_state(|s| s.sender.clone())?;
        match sender {
            Some(tx) => {
                if let Err(mpsc::error::SendError(Ok(event))) = tx.send(Ok(event)).await {
                    self.with_state(|s| {
                        s.sender = None;
                        s.pending.push_back(event);
                    })?;
                }
                Ok(())
            }
            None => self.with_state(|s| s.pending.push_back(event)),
        }
    }

    /// Terminate the current subscription with a stream error
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(tx) = self.with_state(|s| s.sender.take())? {
            let _ = tx.send(Err(LintelError::Nats("connection lost".into()))).await;
        }
        Ok(())
    }

    /// Make the next `count` subscribe calls fail
    pub fn fail_subscribes(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of successful subscribe calls so far
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryWatcher for ChannelWatcher {
    async fn subscribe(&self, subject: &str) -> Result<EventSubscription> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(LintelError::Nats(format!("subscribe to {} refused", subject)));
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let pending = self.with_state(|s| {
            s.sender = Some(tx.clone());
            std::mem::take(&mut s.pending)
        })?;
        self.subscriptions.fetch_add(1, Ordering::SeqCst);

        // Backlog goes through a task so a small channel cannot block subscribe
        tokio::spawn(async move {
            for event in pending {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        });

        Ok(EventSubscription::new(rx, None))
    }
}
