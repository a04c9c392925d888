//! Synthetic monitoring probe agent
//!
//! Periodically runs the configured probes, tracks each alert rule's UP/DOWN
//! state with incident and recovery thresholds, and emits exactly one
//! notification per state crossing.
//!
//! # Components
//!
//! - **Scheduler**: fixed tick, single-flight dispatch, jitter, repeat budget
//! - **ProbeStore**: probe set with its execution table and alert states,
//!   swapped wholesale on reload
//! - **Notifier**: batches notifications and hands them to sinks
//! - **CheckRecorder**: fire-and-forget per-check records
//! - **ConnectivityCheck**: pauses dispatch while the agent is offline

pub mod agent;
pub mod config;
pub mod connectivity;
pub mod evaluation;
pub mod execution;
pub mod notifier;
pub mod recorder;
pub mod scheduler;
pub mod store;
pub mod types;

pub use agent::{Agent, RunningAgent};
pub use config::{Config, ConfigError};
pub use connectivity::{AlwaysConnected, ConnectivityCheck, StunConnectivity};
pub use execution::{ExecutionTable, Phase, ProbeExecutionState};
pub use notifier::{ChannelSink, LogSink, NotificationSink, Notifier, SinkError};
pub use recorder::{ChannelRecorder, CheckRecorder, LogRecorder};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use store::{ProbeEntry, ProbeSet, ProbeStore};
pub use types::{AgentSettings, CheckRecord, Direction, NotificationEvent, RunOutcome};
