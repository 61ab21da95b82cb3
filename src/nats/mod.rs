//! Directory Event Watcher
//!
//! Delivers directory lifecycle events as a bounded, cancellable stream.
//! Delivery is at-least-once and may be reordered; the reconciler's cursor
//! check is what makes that safe.
//!
//! ## Variants
//!
//! - [`NatsWatcher`] - core NATS subscription (async-nats)
//! - [`ChannelWatcher`] - in-process publisher, used by tests

pub mod channel;
pub mod client;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::{DirectoryEvent, Result};

pub use channel::ChannelWatcher;
pub use client::NatsWatcher;

/// Default number of decoded events buffered ahead of the controller
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 1024;

#[async_trait]
pub trait DirectoryWatcher: Send + Sync {
    /// Subscribe to `subject`. The stream ends with an `Err` item (or closes)
    /// when the underlying connection breaks; the caller re-subscribes.
    async fn subscribe(&self, subject: &str) -> Result<EventSubscription>;
}

/// A live subscription
///
/// Backed by a bounded channel, so a slow consumer pushes back on the
/// producing task. Dropping the subscription cancels it.
pub struct EventSubscription {
    events: mpsc::Receiver<Result<DirectoryEvent>>,
    task: Option<JoinHandle<()>>,
}

impl EventSubscription {
    /// Wrap a receiver fed by `task`
    pub fn new(events: mpsc::Receiver<Result<DirectoryEvent>>, task: Option<JoinHandle<()>>) -> Self {
        Self { events, task }
    }

    /// Next event; `None` once the stream is closed or cancelled
    pub async fn next(&mut self) -> Option<Result<DirectoryEvent>> {
        self.events.recv().await
    }

    /// Stop delivery; events already buffered are discarded
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.events.close();
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DirectoryId;

    #[tokio::test]
    async fn test_cancel_closes_stream() {
        let (tx, rx) = mpsc::channel(4);
        let mut subscription = EventSubscription::new(rx, None);

        tx.send(Ok(DirectoryEvent::deleted(DirectoryId::from_u128(1), 1)))
            .await
            .unwrap();
        assert!(subscription.next().await.unwrap().is_ok());

        subscription.cancel();
        assert!(tx.send(Ok(DirectoryEvent::deleted(DirectoryId::from_u128(1), 2))).await.is_err());
        assert!(subscription.next().await.is_none());
    }
}
