//! Interval scheduler with single-flight dispatch.
//!
//! A fixed tick re-evaluates every probe of the current [`ProbeStore`]. Due
//! probes that pass the single-flight guard are dispatched on their own task
//! (jitter, then retry-wrapped probing, then alert evaluation), so a slow
//! probe never delays the tick or other probes.

use crate::connectivity::ConnectivityCheck;
use crate::evaluation::{check_records, evaluate_dispatch};
use crate::execution::ProbeExecutionState;
use crate::recorder::CheckRecorder;
use crate::store::{ProbeEntry, ProbeSet, ProbeStore};
use crate::types::{AgentSettings, NotificationEvent, RunOutcome};
use dashmap::DashSet;
use probe::{AlertState, RetryExecutor};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cloneable access to a running scheduler's state.
#[derive(Clone)]
pub struct SchedulerHandle {
    store: Arc<watch::Sender<Arc<ProbeStore>>>,
}

impl SchedulerHandle {
    /// Replace the probe set.
    ///
    /// Execution and alert state of the old set are discarded with it. New
    /// dispatches use the new set from the next tick on.
    pub fn reload(&self, probes: ProbeSet) {
        info!(probes = probes.len(), "Reloading probe set");
        self.store.send_replace(Arc::new(ProbeStore::new(probes)));
    }

    pub fn execution_state(&self, probe_id: &str) -> Option<ProbeExecutionState> {
        self.store.borrow().executions.get(probe_id)
    }

    pub fn alert_state(&self, probe_id: &str, rule_id: &str) -> Option<AlertState> {
        self.store.borrow().alerts.state(probe_id, rule_id)
    }

    pub fn probe_ids(&self) -> Vec<String> {
        self.store.borrow().probes.ids().map(str::to_string).collect()
    }

    /// Current store.
    pub fn store(&self) -> Arc<ProbeStore> {
        self.store.borrow().clone()
    }
}

/// Shared by every dispatch task
struct DispatchContext {
    store: Arc<watch::Sender<Arc<ProbeStore>>>,
    /// Probe ids with a dispatch in flight, across reloads
    active: DashSet<String>,
    retry: RetryExecutor,
    recorder: Arc<dyn CheckRecorder>,
    notify_tx: mpsc::Sender<NotificationEvent>,
}

/// Returns a probe to idle when its dispatch ends, aborted or not.
struct InFlight {
    ctx: Arc<DispatchContext>,
    store: Arc<ProbeStore>,
    probe_id: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.store.executions.finish(&self.probe_id);
        self.ctx.active.remove(&self.probe_id);
    }
}

/// Drives probe dispatch for the lifetime of the agent
pub struct Scheduler {
    settings: AgentSettings,
    connectivity: Arc<dyn ConnectivityCheck>,
    ctx: Arc<DispatchContext>,
}

impl Scheduler {
    pub fn new(
        settings: AgentSettings,
        connectivity: Arc<dyn ConnectivityCheck>,
        recorder: Arc<dyn CheckRecorder>,
        notify_tx: mpsc::Sender<NotificationEvent>,
        probes: ProbeSet,
    ) -> Self {
        let (store, _) = watch::channel(Arc::new(ProbeStore::new(probes)));
        let ctx = Arc::new(DispatchContext {
            store: Arc::new(store),
            active: DashSet::new(),
            retry: RetryExecutor::new(settings.backoff),
            recorder,
            notify_tx,
        });
        Self {
            settings,
            connectivity,
            ctx,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            store: self.ctx.store.clone(),
        }
    }

    /// Tick until cancelled or until every probe used its repeat budget.
    ///
    /// On cancellation no new dispatch starts; in-flight dispatches get
    /// `shutdown_grace` to finish before they are aborted.
    pub async fn run(self, cancel: CancellationToken) -> RunOutcome {
        info!(
            tick_ms = self.settings.tick.as_millis(),
            repeat = self.settings.repeat,
            probes = self.ctx.store.borrow().probes.len(),
            "Scheduler started"
        );

        let mut ticker = interval(self.settings.tick.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut in_flight = JoinSet::new();
        let mut offline = false;

        let outcome = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break RunOutcome::Cancelled,

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Dispatch task failed");
                    }
                }

                _ = ticker.tick() => {
                    let store = self.ctx.store.borrow().clone();

                    if store.executions.all_exhausted(self.settings.repeat) {
                        info!(repeat = self.settings.repeat, "All probes exhausted their repeat budget");
                        break RunOutcome::Exhausted;
                    }

                    if !self.connectivity.is_connected() {
                        if !offline {
                            warn!("Agent offline, skipping probe dispatch");
                            offline = true;
                        }
                        continue;
                    }
                    if offline {
                        info!("Agent back online, resuming probe dispatch");
                        offline = false;
                    }

                    self.dispatch_due(&store, &mut in_flight);
                }
            }
        };

        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "Waiting for in-flight dispatches");
            let drained = timeout(self.settings.shutdown_grace, async {
                while in_flight.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(in_flight = in_flight.len(), "Shutdown grace elapsed, aborting dispatches");
                in_flight.abort_all();
                while in_flight.join_next().await.is_some() {}
            }
        }

        info!(?outcome, "Scheduler stopped");
        outcome
    }

    fn dispatch_due(&self, store: &Arc<ProbeStore>, in_flight: &mut JoinSet<()>) {
        let now = Instant::now();
        let repeat = self.settings.repeat;

        for entry in store.probes.iter() {
            let id = entry.probe.id.as_str();

            if store.executions.is_exhausted(id, repeat) {
                continue;
            }
            if !store.executions.is_due(id, entry.probe.interval, now) {
                continue;
            }
            // still running under a superseded probe set
            if self.ctx.active.contains(id) {
                continue;
            }
            if !store.executions.try_start(id) {
                continue;
            }
            self.ctx.active.insert(id.to_string());

            let jitter = self.pick_jitter();
            debug!(probe_id = %id, jitter_ms = jitter.as_millis(), "Dispatching probe");

            let ctx = self.ctx.clone();
            let store = store.clone();
            let entry = entry.clone();
            in_flight.spawn(async move {
                dispatch(ctx, store, entry, jitter).await;
            });
        }
    }

    fn pick_jitter(&self) -> Duration {
        self.settings
            .jitter
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// One dispatch of one probe.
async fn dispatch(ctx: Arc<DispatchContext>, store: Arc<ProbeStore>, entry: ProbeEntry, jitter: Duration) {
    let _guard = InFlight {
        ctx: ctx.clone(),
        store: store.clone(),
        probe_id: entry.probe.id.clone(),
    };
    let probe_id = entry.probe.id.as_str();

    if !jitter.is_zero() {
        sleep(jitter).await;
    }

    let outcome = ctx
        .retry
        .execute(entry.prober.as_ref(), entry.probe.thresholds())
        .await;

    debug!(probe_id, attempts = outcome.attempts, success = outcome.succeeded(), "Probe dispatch finished");

    let current = ctx.store.borrow().clone();
    if !Arc::ptr_eq(&current, &store) {
        if current.probes.contains(probe_id) {
            debug!(probe_id, "Probe set reloaded during dispatch, recording without alert evaluation");
            for record in check_records(probe_id, &entry.rules, &outcome.results) {
                ctx.recorder.record(record);
            }
        } else {
            debug!(probe_id, "Probe removed during dispatch, discarding results");
        }
        return;
    }

    let report = evaluate_dispatch(&entry.probe, &entry.rules, &outcome.results, &store.alerts);

    for record in report.records {
        ctx.recorder.record(record);
    }
    for event in report.notifications {
        match ctx.notify_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(probe_id, rule_id = %event.alert_rule_id, direction = %event.direction,
                      "Notification queue full, dropping notification");
            }
            Err(TrySendError::Closed(_)) => {
                warn!(probe_id, "Notification channel closed, dropping notification");
            }
        }
    }
}
