//! NATS directory event watcher
//!
//! Connection setup follows the gateway's NATS client: named connection,
//! keep-alive pings, fast failure on the initial connect.

use std::time::Duration;

use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{DirectoryWatcher, EventSubscription, DEFAULT_SUBSCRIPTION_BUFFER};
use crate::config::NatsArgs;
use crate::types::{DirectoryEvent, LintelError, Result};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// Watches a NATS subject for directory events
#[derive(Clone)]
pub struct NatsWatcher {
    client: Client,
    buffer: usize,
}

impl NatsWatcher {
    /// Connect to NATS
    pub async fn connect(args: &NatsArgs, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", args.nats_url);

        let mut options = match &args.nats_nkey {
            Some(seed) => ConnectOptions::with_nkey(seed.clone()),
            None => ConnectOptions::new(),
        }
        .name(name)
        .ping_interval(DEFAULT_PING_INTERVAL)
        .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| LintelError::Nats(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);

        Ok(Self {
            client,
            buffer: DEFAULT_SUBSCRIPTION_BUFFER,
        })
    }

    /// Set how many decoded events may queue ahead of the consumer
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }
}

#[async_trait]
impl DirectoryWatcher for NatsWatcher {
    async fn subscribe(&self, subject: &str) -> Result<EventSubscription> {
        let mut subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| LintelError::Nats(format!("Subscribe failed: {}", e)))?;

        info!(subject = %subject, "Subscribed to directory events");

        let (tx, rx) = mpsc::channel(self.buffer);
        let subject = subject.to_string();

        let task = tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                match DirectoryEvent::decode(&message.payload) {
                    Ok(event) => {
                        debug!(node = %event.node_id, kind = %event.kind, sequence = event.sequence, "Received directory event");
                        if tx.send(Ok(event)).await.is_err() {
                            // Consumer went away
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(subject = %message.subject, error = %e, "Skipping undecodable directory event");
                    }
                }
            }

            let _ = tx
                .send(Err(LintelError::Nats(format!("subscription to {} ended", subject))))
                .await;
        });

        Ok(EventSubscription::new(rx, Some(task)))
    }
}
