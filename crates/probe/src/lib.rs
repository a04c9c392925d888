//! Protocol probing and alert threshold evaluation.
//!
//! This crate holds the protocol-agnostic core of the probe agent:
//! - [`Probe`] definitions and the normalized [`ProbeResult`]
//! - [`Prober`] implementations for HTTP (with response chaining), TCP,
//!   ICMP, Postgres, MySQL/MariaDB, MongoDB, Redis and external scripts
//! - [`RetryExecutor`], bounded by a probe's thresholds
//! - [`AlertThresholdEngine`], the per-(probe, rule) UP/DOWN state machine
//!
//! # Example
//!
//! ```no_run
//! use probe::{probers, AlertThresholdEngine, RetryExecutor, RuleSet, types::Probe};
//! use std::sync::Arc;
//!
//! # async fn example(probe: Probe) -> common::Result<()> {
//! let rules = Arc::new(RuleSet::compile(&probe)?);
//! let prober = probers::build(&probe, rules.clone())?;
//! let engine = AlertThresholdEngine::new();
//!
//! let outcome = RetryExecutor::default()
//!     .execute(prober.as_ref(), probe.thresholds())
//!     .await;
//!
//! for result in &outcome.results {
//!     for rule in rules.applicable(result.request_index) {
//!         let triggered = rule.is_triggered(result);
//!         if let Some(transition) =
//!             engine.evaluate(&probe.id, &rule.id, triggered, probe.thresholds())
//!         {
//!             println!("{} {}: {}", probe.id, transition, rule.rule.message);
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod assertion;
pub mod probers;
pub mod retry;
pub mod rules;
pub mod template;
pub mod threshold;
pub mod types;

pub use assertion::Assertion;
pub use probers::Prober;
pub use retry::{BackoffPolicy, RetryExecutor, RetryOutcome};
pub use rules::{CompiledRule, RuleSet};
pub use threshold::{AlertKey, AlertState, AlertStatus, AlertThresholdEngine, Transition};
pub use types::{AlertRule, Probe, ProbeKind, ProbeResult, ProbeSpec, Thresholds};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transition_display() {
        assert_eq!(Transition::Incident.to_string(), "INCIDENT");
        assert_eq!(Transition::Recovery.to_string(), "RECOVERY");
        assert_eq!(AlertStatus::Down.to_string(), "DOWN");
    }

    #[test]
    fn test_default_rule_flags_failed_result() {
        let probe = Probe {
            id: "db".to_string(),
            name: String::new(),
            description: None,
            interval: Duration::from_secs(10),
            incident_threshold: 2,
            recovery_threshold: 2,
            alerts: vec![],
            spec: ProbeSpec::Redis(vec![Default::default()]),
        };
        let rules = RuleSet::compile(&probe).unwrap();

        let dead = ProbeResult::unreachable(0, Duration::from_millis(3), "refused");
        let alive = ProbeResult::alive(0, Duration::from_millis(3));
        assert!(rules.any_triggered(&dead));
        assert!(!rules.any_triggered(&alive));
    }

    #[test]
    fn test_threshold_budget() {
        assert_eq!(Thresholds::new(2, 7).max_attempts(), 7);
        assert_eq!(Thresholds::new(3, 1).max_attempts(), 3);
    }
}
