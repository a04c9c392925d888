//! Probe agent wiring: notifier, recorder, connectivity gate and scheduler.

use crate::connectivity::{AlwaysConnected, ConnectivityCheck, StunConnectivity};
use crate::notifier::{LogSink, NotificationSink, Notifier};
use crate::recorder::{CheckRecorder, LogRecorder};
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::store::ProbeSet;
use crate::types::{AgentSettings, NotificationEvent, RunOutcome};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Probe agent
pub struct Agent {
    settings: AgentSettings,
    sinks: Vec<Arc<dyn NotificationSink>>,
    recorder: Arc<dyn CheckRecorder>,
    connectivity: Option<Arc<dyn ConnectivityCheck>>,
}

/// A started agent
pub struct RunningAgent {
    handle: SchedulerHandle,
    scheduler: JoinHandle<RunOutcome>,
    notifier: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Agent {
    /// Create an agent that logs notifications and checks.
    pub fn new(settings: AgentSettings) -> Self {
        Self {
            settings,
            sinks: vec![Arc::new(LogSink)],
            recorder: Arc::new(LogRecorder),
            connectivity: None,
        }
    }

    /// Replace the notification sinks.
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    /// Add a notification sink.
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn CheckRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Use a specific connectivity gate instead of the configured one.
    pub fn with_connectivity(mut self, connectivity: Arc<dyn ConnectivityCheck>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Spawn the notifier and scheduler tasks.
    pub async fn start(self, probes: ProbeSet, cancel: CancellationToken) -> RunningAgent {
        info!(probes = probes.len(), "Starting probe agent");

        let (notify_tx, notify_rx) = mpsc::channel::<NotificationEvent>(self.settings.channel_size.max(1));

        let connectivity: Arc<dyn ConnectivityCheck> = match self.connectivity {
            Some(gate) => gate,
            None if self.settings.connectivity_enabled => {
                StunConnectivity::new(
                    self.settings.stun_server.clone(),
                    self.settings.connectivity_interval,
                    self.settings.connectivity_timeout,
                )
                .start(cancel.child_token())
                .await
            }
            None => Arc::new(AlwaysConnected),
        };

        let notifier = Notifier::new(
            notify_rx,
            self.sinks,
            self.settings.batch_delay,
            self.settings.batch_size,
        )
        .with_sink_timeout(self.settings.sink_timeout);
        let notifier = tokio::spawn(async move {
            notifier.run().await;
        });

        let scheduler = Scheduler::new(self.settings, connectivity, self.recorder, notify_tx, probes);
        let handle = scheduler.handle();
        let scheduler = tokio::spawn(scheduler.run(cancel.clone()));

        RunningAgent {
            handle,
            scheduler,
            notifier,
            cancel,
        }
    }
}

impl RunningAgent {
    pub fn handle(&self) -> &SchedulerHandle {
        &self.handle
    }

    /// Stop dispatching new checks.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for the scheduler to stop and pending notifications to be delivered.
    pub async fn wait(self) -> anyhow::Result<RunOutcome> {
        let outcome = self.scheduler.await?;
        // Stops the connectivity checker after an exhausted run.
        self.cancel.cancel();
        self.notifier.await?;
        info!(?outcome, "Probe agent stopped");
        Ok(outcome)
    }
}
