//! Validated probe sets and the state owned by one of them.

use crate::execution::ExecutionTable;
use common::{Error, Result};
use probe::probers::{self, Prober};
use probe::{AlertThresholdEngine, Probe, RuleSet};
use std::collections::HashMap;
use std::sync::Arc;

/// A probe ready for dispatch
#[derive(Clone)]
pub struct ProbeEntry {
    pub probe: Arc<Probe>,
    pub rules: Arc<RuleSet>,
    pub prober: Arc<dyn Prober>,
}

/// Validated, immutable list of probes.
///
/// Replaced wholesale on reload, never mutated.
#[derive(Clone, Default)]
pub struct ProbeSet {
    entries: Vec<ProbeEntry>,
    index: HashMap<String, usize>,
}

impl ProbeSet {
    /// Validate probe definitions and build their probers.
    pub fn build(probes: Vec<Probe>) -> Result<Self> {
        let mut set = Self::default();
        for probe in probes {
            let rules = Arc::new(RuleSet::compile(&probe)?);
            let prober = probers::build(&probe, rules.clone())?;
            set.push(probe, rules, prober)?;
        }
        Ok(set)
    }

    /// Build from probes paired with ready-made probers.
    pub fn from_parts(parts: Vec<(Probe, Arc<dyn Prober>)>) -> Result<Self> {
        let mut set = Self::default();
        for (probe, prober) in parts {
            let rules = Arc::new(RuleSet::compile(&probe)?);
            set.push(probe, rules, prober)?;
        }
        Ok(set)
    }

    fn push(&mut self, probe: Probe, rules: Arc<RuleSet>, prober: Arc<dyn Prober>) -> Result<()> {
        if probe.id.trim().is_empty() {
            return Err(Error::config("probe id must not be empty"));
        }
        if probe.interval.is_zero() {
            return Err(Error::config(format!("probe '{}': interval must be > 0", probe.id)));
        }
        if probe.incident_threshold < 1 || probe.recovery_threshold < 1 {
            return Err(Error::config(format!(
                "probe '{}': thresholds must be >= 1",
                probe.id
            )));
        }
        if self.index.contains_key(&probe.id) {
            return Err(Error::config(format!("duplicate probe id '{}'", probe.id)));
        }

        self.index.insert(probe.id.clone(), self.entries.len());
        self.entries.push(ProbeEntry {
            probe: Arc::new(probe),
            rules,
            prober,
        });
        Ok(())
    }

    pub fn get(&self, probe_id: &str) -> Option<&ProbeEntry> {
        self.index.get(probe_id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, probe_id: &str) -> bool {
        self.index.contains_key(probe_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProbeEntry> {
        self.entries.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.probe.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ProbeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeSet")
            .field("probes", &self.ids().collect::<Vec<_>>())
            .finish()
    }
}

/// Everything tied to one probe set: its probes, execution table and alert
/// states. A reload swaps the whole store.
pub struct ProbeStore {
    pub probes: ProbeSet,
    pub executions: ExecutionTable,
    pub alerts: AlertThresholdEngine,
}

impl ProbeStore {
    pub fn new(probes: ProbeSet) -> Self {
        let executions = ExecutionTable::new(probes.ids());
        Self {
            probes,
            executions,
            alerts: AlertThresholdEngine::new(),
        }
    }
}
