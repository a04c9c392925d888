//! Runtime settings and the events the agent emits.

use probe::{BackoffPolicy, ProbeResult, Transition};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Direction of a notification-worthy transition.
pub type Direction = Transition;

/// Agent runtime settings
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Scheduler tick
    pub tick: Duration,

    /// Jitter choices applied before each dispatch; empty disables jitter
    pub jitter: Vec<Duration>,

    /// Cycles per probe before the run ends; 0 runs forever
    pub repeat: u32,

    /// How long cancellation waits for in-flight dispatches
    pub shutdown_grace: Duration,

    /// Backoff between retry attempts
    pub backoff: BackoffPolicy,

    /// Whether the STUN connectivity gate is active
    pub connectivity_enabled: bool,

    pub stun_server: String,

    pub connectivity_interval: Duration,

    pub connectivity_timeout: Duration,

    /// Batch delay for notifications
    pub batch_delay: Duration,

    /// Maximum batch size
    pub batch_size: usize,

    /// Longest one sink may take to accept a notification
    pub sink_timeout: Duration,

    /// Notification channel buffer size
    pub channel_size: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            jitter: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
            ],
            repeat: 0,
            shutdown_grace: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
            connectivity_enabled: false,
            stun_server: "stun.l.google.com:19302".to_string(),
            connectivity_interval: Duration::from_secs(20),
            connectivity_timeout: Duration::from_secs(5),
            batch_delay: Duration::from_millis(100),
            batch_size: 100,
            sink_timeout: Duration::from_secs(10),
            channel_size: 1000,
        }
    }
}

/// Incident or recovery of one alert rule of one probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub probe_id: String,
    pub probe_name: String,
    pub alert_rule_id: String,
    pub direction: Direction,
    pub message: String,
    /// Result that caused the transition
    pub result: ProbeResult,
    pub timestamp: SystemTime,
}

/// Record of one checked request or target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRecord {
    pub probe_id: String,
    pub request_index: usize,
    pub result: ProbeResult,
    pub triggered_rule_ids: Vec<String>,
    pub timestamp: SystemTime,
}

/// How a scheduler run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every probe completed its repeat budget
    Exhausted,
    /// The cancellation token fired
    Cancelled,
}
