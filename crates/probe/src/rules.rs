//! Compiled alert rules for a probe.

use crate::assertion::Assertion;
use crate::types::{AlertRule, Probe, ProbeKind, ProbeResult, ProbeSpec};
use common::{Error, Result};
use std::collections::HashSet;

/// Where a rule applies within its probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    /// Every request or target of the probe
    Probe,
    /// A single HTTP request
    Request(usize),
}

/// An alert rule with its assertion parsed and its id resolved.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    pub rule: AlertRule,
    pub assertion: Assertion,
    pub scope: RuleScope,
}

impl CompiledRule {
    fn compile(rule: &AlertRule, scope: RuleScope) -> Result<Self> {
        let assertion = Assertion::parse(&rule.assertion)?;
        let id = match (scope, rule.id.is_empty()) {
            (RuleScope::Request(idx), true) => format!("requests[{}]:{}", idx, rule.assertion),
            _ => rule.key().to_string(),
        };
        Ok(Self {
            id,
            rule: rule.clone(),
            assertion,
            scope,
        })
    }

    pub fn applies_to(&self, request_index: usize) -> bool {
        match self.scope {
            RuleScope::Probe => true,
            RuleScope::Request(idx) => idx == request_index,
        }
    }

    /// Whether the alert condition holds for this result.
    pub fn is_triggered(&self, result: &ProbeResult) -> bool {
        self.assertion.matches(result)
    }
}

/// All rules of one probe in declaration order: probe-level first, then
/// each request's rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Compile the rules of a probe, falling back to protocol defaults when
    /// the probe declares none.
    pub fn compile(probe: &Probe) -> Result<Self> {
        let mut rules = Vec::new();

        for rule in &probe.alerts {
            rules.push(CompiledRule::compile(rule, RuleScope::Probe)?);
        }
        if let ProbeSpec::Http(requests) = &probe.spec {
            for (idx, request) in requests.iter().enumerate() {
                for rule in &request.alerts {
                    rules.push(CompiledRule::compile(rule, RuleScope::Request(idx))?);
                }
            }
        }

        if rules.is_empty() {
            for rule in default_rules(probe.spec.kind()) {
                rules.push(CompiledRule::compile(&rule, RuleScope::Probe)?);
            }
        }

        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(Error::config(format!(
                    "probe '{}' declares alert rule '{}' more than once",
                    probe.id, rule.id
                )));
            }
        }

        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules applicable to one request, in evaluation order.
    pub fn applicable(&self, request_index: usize) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter().filter(move |r| r.applies_to(request_index))
    }

    /// Rules triggered by a result.
    pub fn triggered(&self, result: &ProbeResult) -> Vec<&CompiledRule> {
        self.applicable(result.request_index)
            .filter(|r| r.is_triggered(result))
            .collect()
    }

    pub fn any_triggered(&self, result: &ProbeResult) -> bool {
        self.applicable(result.request_index)
            .any(|r| r.is_triggered(result))
    }
}

/// Rules used when a probe declares none.
pub fn default_rules(kind: ProbeKind) -> Vec<AlertRule> {
    match kind {
        ProbeKind::Http => vec![
            AlertRule::new(
                "status-not-2xx",
                "response.status < 200 or response.status > 299",
                "HTTP response status is not 2xx",
            ),
            AlertRule::new(
                "response-time-greater-than-2-s",
                "response.time > 2000",
                "Response time is greater than 2 seconds",
            ),
        ],
        ProbeKind::Script => vec![AlertRule::new(
            "script-failed",
            "response.status != 0",
            "Script exited with a non-zero status",
        )],
        _ => vec![AlertRule::new(
            "target-unreachable",
            "response.status != 200",
            "Target is unreachable",
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HttpRequest, TcpTarget};
    use std::time::Duration;

    fn http_probe(alerts: Vec<AlertRule>, requests: Vec<HttpRequest>) -> Probe {
        Probe {
            id: "web".to_string(),
            name: String::new(),
            description: None,
            interval: Duration::from_secs(10),
            incident_threshold: 2,
            recovery_threshold: 2,
            alerts,
            spec: ProbeSpec::Http(requests),
        }
    }

    #[test]
    fn test_defaults_when_no_rules() {
        let probe = http_probe(vec![], vec![HttpRequest::get("http://localhost")]);
        let rules = RuleSet::compile(&probe).unwrap();
        let ids: Vec<_> = rules.rules().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["status-not-2xx", "response-time-greater-than-2-s"]);

        let tcp = Probe {
            spec: ProbeSpec::Tcp(vec![TcpTarget {
                host: "localhost".into(),
                port: 1,
                data: None,
                timeout: Duration::from_secs(1),
            }]),
            ..probe
        };
        let rules = RuleSet::compile(&tcp).unwrap();
        assert_eq!(rules.rules()[0].id, "target-unreachable");
    }

    #[test]
    fn test_probe_rules_precede_request_rules() {
        let mut second = HttpRequest::get("http://localhost/b");
        second.alerts = vec![AlertRule::new("", "response.status == 404", "missing")];
        let probe = http_probe(
            vec![AlertRule::new("down", "response.status >= 500", "down")],
            vec![HttpRequest::get("http://localhost/a"), second],
        );

        let rules = RuleSet::compile(&probe).unwrap();
        let first: Vec<_> = rules.applicable(0).map(|r| r.id.as_str()).collect();
        assert_eq!(first, vec!["down"]);

        let second: Vec<_> = rules.applicable(1).map(|r| r.id.as_str()).collect();
        assert_eq!(second, vec!["down", "requests[1]:response.status == 404"]);
    }

    #[test]
    fn test_triggered() {
        let probe = http_probe(
            vec![
                AlertRule::new("down", "response.status != 200", "down"),
                AlertRule::new("slow", "response.time > 100", "slow"),
            ],
            vec![HttpRequest::get("http://localhost")],
        );
        let rules = RuleSet::compile(&probe).unwrap();

        let result = ProbeResult::with_status(0, 500, Duration::from_millis(10));
        let triggered: Vec<_> = rules.triggered(&result).iter().map(|r| r.id.clone()).collect();
        assert_eq!(triggered, vec!["down".to_string()]);
        assert!(rules.any_triggered(&result));

        let fine = ProbeResult::with_status(0, 200, Duration::from_millis(10));
        assert!(!rules.any_triggered(&fine));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let probe = http_probe(
            vec![
                AlertRule::new("x", "response.status != 200", "a"),
                AlertRule::new("x", "response.time > 10", "b"),
            ],
            vec![HttpRequest::get("http://localhost")],
        );
        let err = RuleSet::compile(&probe).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_invalid_assertion_rejected() {
        let probe = http_probe(
            vec![AlertRule::new("bad", "response.status ===", "a")],
            vec![HttpRequest::get("http://localhost")],
        );
        assert!(RuleSet::compile(&probe).is_err());
    }
}
