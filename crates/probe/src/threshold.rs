//! Alert threshold state machine.
//!
//! Each (probe, alert rule) pair owns an [`AlertState`]. Every evaluation
//! feeds one boolean into [`AlertState::apply`], which returns the new
//! state and at most one [`Transition`].

use crate::types::Thresholds;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Alert status of a (probe, rule) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    #[default]
    Up,
    Down,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertStatus::Up => write!(f, "UP"),
            AlertStatus::Down => write!(f, "DOWN"),
        }
    }
}

/// Notification-worthy status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Transition {
    /// UP -> DOWN
    Incident,
    /// DOWN -> UP
    Recovery,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Incident => write!(f, "INCIDENT"),
            Transition::Recovery => write!(f, "RECOVERY"),
        }
    }
}

/// Counters and status for one (probe, rule) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlertState {
    pub status: AlertStatus,
    pub consecutive_true: u32,
    pub consecutive_false: u32,
    pub total_true: u64,
    pub total_false: u64,
}

impl AlertState {
    /// Apply one evaluation.
    ///
    /// A transition is only ever reported on the evaluation that crosses a
    /// threshold; a recovery is only reported from DOWN.
    pub fn apply(self, triggered: bool, thresholds: Thresholds) -> (AlertState, Option<Transition>) {
        let mut next = self;

        if triggered {
            next.consecutive_false = 0;
            next.consecutive_true = next.consecutive_true.saturating_add(1);
            next.total_true += 1;

            if next.status == AlertStatus::Up && next.consecutive_true >= thresholds.incident {
                next.status = AlertStatus::Down;
                return (next, Some(Transition::Incident));
            }
        } else {
            next.consecutive_true = 0;
            next.consecutive_false = next.consecutive_false.saturating_add(1);
            next.total_false += 1;

            if next.status == AlertStatus::Down && next.consecutive_false >= thresholds.recovery {
                next.status = AlertStatus::Up;
                return (next, Some(Transition::Recovery));
            }
        }

        (next, None)
    }

    pub fn is_down(&self) -> bool {
        self.status == AlertStatus::Down
    }
}

/// Key of an alert state: (probe id, rule id)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub probe_id: String,
    pub rule_id: String,
}

impl AlertKey {
    pub fn new(probe_id: impl Into<String>, rule_id: impl Into<String>) -> Self {
        Self {
            probe_id: probe_id.into(),
            rule_id: rule_id.into(),
        }
    }
}

/// Owns every alert state of one probe set.
///
/// States are created lazily on first evaluation. A configuration reload
/// replaces the whole engine.
#[derive(Debug, Default)]
pub struct AlertThresholdEngine {
    states: DashMap<AlertKey, AlertState>,
}

impl AlertThresholdEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one evaluation and return the transition it caused, if any.
    ///
    /// The read-modify-write happens under the map's entry lock, so the
    /// update is atomic per (probe, rule) pair.
    pub fn evaluate(
        &self,
        probe_id: &str,
        rule_id: &str,
        triggered: bool,
        thresholds: Thresholds,
    ) -> Option<Transition> {
        let mut entry = self
            .states
            .entry(AlertKey::new(probe_id, rule_id))
            .or_default();

        let (next, transition) = entry.apply(triggered, thresholds);
        *entry = next;
        drop(entry);

        match transition {
            Some(Transition::Incident) => warn!(
                probe_id,
                rule_id,
                consecutive = next.consecutive_true,
                "Alert condition crossed incident threshold"
            ),
            Some(Transition::Recovery) => info!(
                probe_id,
                rule_id,
                consecutive = next.consecutive_false,
                "Alert condition crossed recovery threshold"
            ),
            None => debug!(
                probe_id,
                rule_id,
                triggered,
                status = %next.status,
                consecutive_true = next.consecutive_true,
                consecutive_false = next.consecutive_false,
                "Alert evaluated"
            ),
        }

        transition
    }

    /// Current state of a pair, if it has been evaluated.
    pub fn state(&self, probe_id: &str, rule_id: &str) -> Option<AlertState> {
        self.states
            .get(&AlertKey::new(probe_id, rule_id))
            .map(|s| *s)
    }

    /// All states of one probe.
    pub fn probe_states(&self, probe_id: &str) -> Vec<(String, AlertState)> {
        self.states
            .iter()
            .filter(|e| e.key().probe_id == probe_id)
            .map(|e| (e.key().rule_id.clone(), *e.value()))
            .collect()
    }

    /// Drop the states of probes not in `keep`.
    pub fn retain_probes(&self, keep: &std::collections::HashSet<String>) {
        self.states.retain(|k, _| keep.contains(&k.probe_id));
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&self) {
        self.states.clear();
    }
}
