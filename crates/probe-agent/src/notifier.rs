//! Notifier for batching and delivering alert notifications.

use crate::types::NotificationEvent;
use async_trait::async_trait;
use futures::future::join_all;
use probe::Transition;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval, timeout};
use tracing::{debug, info, warn};

/// Delivery failure reported by a sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink is closed")]
    Closed,

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Longest a single sink may take to accept one notification
pub const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers notifications to one channel (chat, pager, webhook, ...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, event: &NotificationEvent) -> Result<(), SinkError>;
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, event: &NotificationEvent) -> Result<(), SinkError> {
        match event.direction {
            Transition::Incident => warn!(
                probe_id = %event.probe_id,
                probe = %event.probe_name,
                rule_id = %event.alert_rule_id,
                status = event.result.status,
                "INCIDENT: {}",
                event.message
            ),
            Transition::Recovery => info!(
                probe_id = %event.probe_id,
                probe = %event.probe_name,
                rule_id = %event.alert_rule_id,
                status = event.result.status,
                "RECOVERY: {}",
                event.message
            ),
        }
        Ok(())
    }
}

/// Forwards notifications to a host process over a channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<NotificationEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<NotificationEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn send(&self, event: &NotificationEvent) -> Result<(), SinkError> {
        self.tx.send(event.clone()).await.map_err(|_| SinkError::Closed)
    }
}

/// Notifier batches notifications and hands them to every sink
pub struct Notifier {
    /// Notification receiver
    notify_rx: mpsc::Receiver<NotificationEvent>,

    sinks: Vec<Arc<dyn NotificationSink>>,

    /// Batch delay
    batch_delay: Duration,

    /// Maximum batch size
    batch_size: usize,

    /// Per-sink delivery deadline
    sink_timeout: Duration,
}

impl Notifier {
    /// Create a new notifier
    pub fn new(
        notify_rx: mpsc::Receiver<NotificationEvent>,
        sinks: Vec<Arc<dyn NotificationSink>>,
        batch_delay: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            notify_rx,
            sinks,
            batch_delay: batch_delay.max(Duration::from_millis(1)),
            batch_size: batch_size.max(1),
            sink_timeout: DEFAULT_SINK_TIMEOUT,
        }
    }

    /// Give up on a sink that has not accepted a notification within `limit`.
    pub fn with_sink_timeout(mut self, limit: Duration) -> Self {
        self.sink_timeout = limit.max(Duration::from_millis(1));
        self
    }

    /// Run until every sender is dropped, then flush what is left.
    pub async fn run(mut self) {
        info!(sinks = self.sinks.len(), "Notifier task started");

        let mut batch = Vec::new();
        let mut batch_timer = interval(self.batch_delay);
        batch_timer.tick().await; // Skip first immediate tick

        let mut last_batch_time = Instant::now();

        loop {
            tokio::select! {
                received = self.notify_rx.recv() => {
                    let Some(event) = received else {
                        break;
                    };
                    debug!(probe_id = %event.probe_id, rule_id = %event.alert_rule_id,
                           direction = %event.direction, "Received notification");
                    batch.push(event);

                    if batch.len() >= self.batch_size {
                        self.send_batch(&mut batch).await;
                        last_batch_time = Instant::now();
                        batch_timer.reset();
                    }
                }

                _ = batch_timer.tick() => {
                    if !batch.is_empty() && last_batch_time.elapsed() >= self.batch_delay {
                        self.send_batch(&mut batch).await;
                        last_batch_time = Instant::now();
                    }
                }
            }
        }

        self.send_batch(&mut batch).await;
        info!("Notifier task stopped");
    }

    /// Deliver a batch, each event to all sinks concurrently. Failures are
    /// logged, never retried.
    async fn send_batch(&self, batch: &mut Vec<NotificationEvent>) {
        if batch.is_empty() {
            return;
        }

        info!("Sending notification batch with {} items", batch.len());

        for event in batch.drain(..) {
            let deliveries = self.sinks.iter().map(|sink| {
                let event = &event;
                let limit = self.sink_timeout;
                async move {
                    let outcome = match timeout(limit, sink.send(event)).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(SinkError::Timeout(limit)),
                    };
                    (sink.name(), outcome)
                }
            });
            for (sink, outcome) in join_all(deliveries).await {
                if let Err(e) = outcome {
                    warn!(sink, probe_id = %event.probe_id, error = %e,
                          "Failed to deliver notification");
                }
            }
        }
    }
}
