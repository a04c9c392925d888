//! Per-probe execution state and the single-flight guard.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Whether a probe has a dispatch in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Running,
}

/// Execution bookkeeping for one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeExecutionState {
    pub probe_id: String,
    pub phase: Phase,
    /// Dispatches started so far
    pub cycle_count: u32,
    pub last_started_at: Option<Instant>,
    pub last_finished_at: Option<Instant>,
}

impl ProbeExecutionState {
    fn new(probe_id: String) -> Self {
        Self {
            probe_id,
            phase: Phase::Idle,
            cycle_count: 0,
            last_started_at: None,
            last_finished_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Idle and at least `interval` since the last dispatch finished.
    pub fn is_due(&self, interval: Duration, now: Instant) -> bool {
        if self.is_running() {
            return false;
        }
        match self.last_finished_at {
            None => true,
            Some(finished) => now.saturating_duration_since(finished) >= interval,
        }
    }

    /// Whether a repeat budget (`repeat > 0`) is used up.
    pub fn is_exhausted(&self, repeat: u32) -> bool {
        repeat > 0 && self.cycle_count >= repeat
    }
}

/// Execution states of one probe set, keyed by probe id.
#[derive(Debug, Default)]
pub struct ExecutionTable {
    states: DashMap<String, ProbeExecutionState>,
}

impl ExecutionTable {
    pub fn new<I, S>(probe_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let states = DashMap::new();
        for id in probe_ids {
            let id = id.into();
            states.insert(id.clone(), ProbeExecutionState::new(id));
        }
        Self { states }
    }

    /// Move an idle probe to `Running`.
    ///
    /// Returns false, changing nothing, when the probe is unknown or already
    /// running.
    pub fn try_start(&self, probe_id: &str) -> bool {
        let Some(mut state) = self.states.get_mut(probe_id) else {
            return false;
        };
        if state.is_running() {
            return false;
        }
        state.phase = Phase::Running;
        state.cycle_count = state.cycle_count.saturating_add(1);
        state.last_started_at = Some(Instant::now());
        true
    }

    /// Move a probe back to `Idle`.
    pub fn finish(&self, probe_id: &str) {
        if let Some(mut state) = self.states.get_mut(probe_id) {
            state.phase = Phase::Idle;
            state.last_finished_at = Some(Instant::now());
        }
    }

    pub fn get(&self, probe_id: &str) -> Option<ProbeExecutionState> {
        self.states.get(probe_id).map(|s| s.clone())
    }

    pub fn is_due(&self, probe_id: &str, interval: Duration, now: Instant) -> bool {
        self.states
            .get(probe_id)
            .is_some_and(|s| s.is_due(interval, now))
    }

    pub fn is_exhausted(&self, probe_id: &str, repeat: u32) -> bool {
        self.states
            .get(probe_id)
            .is_some_and(|s| s.is_exhausted(repeat))
    }

    pub fn running_count(&self) -> usize {
        self.states.iter().filter(|s| s.is_running()).count()
    }

    /// True when every probe used its repeat budget and none is running.
    ///
    /// Never true for an unbounded run (`repeat == 0`) or an empty table.
    pub fn all_exhausted(&self, repeat: u32) -> bool {
        repeat > 0
            && !self.states.is_empty()
            && self
                .states
                .iter()
                .all(|s| s.is_exhausted(repeat) && !s.is_running())
    }

    pub fn snapshot(&self) -> Vec<ProbeExecutionState> {
        let mut states: Vec<_> = self.states.iter().map(|s| s.clone()).collect();
        states.sort_by(|a, b| a.probe_id.cmp(&b.probe_id));
        states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
