//! Feeding a dispatch's results into alert state.

use crate::types::{CheckRecord, NotificationEvent};
use probe::{AlertThresholdEngine, Probe, ProbeResult, RuleSet, Transition};
use std::time::SystemTime;

/// Check records and notifications produced by one dispatch.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub records: Vec<CheckRecord>,
    pub notifications: Vec<NotificationEvent>,
}

/// One check record per result, listing the rules each result triggered.
pub fn check_records(probe_id: &str, rules: &RuleSet, results: &[ProbeResult]) -> Vec<CheckRecord> {
    let timestamp = SystemTime::now();
    results
        .iter()
        .map(|result| CheckRecord {
            probe_id: probe_id.to_string(),
            request_index: result.request_index,
            result: result.clone(),
            triggered_rule_ids: rules
                .triggered(result)
                .into_iter()
                .map(|r| r.id.clone())
                .collect(),
            timestamp,
        })
        .collect()
}

/// Evaluate every rule once against the results of a dispatch.
///
/// A rule is triggered when any result it applies to triggers it. Rules
/// with no applicable result (the chain stopped before their request) are
/// not evaluated. Rules are visited in declaration order.
pub fn evaluate_dispatch(
    probe: &Probe,
    rules: &RuleSet,
    results: &[ProbeResult],
    engine: &AlertThresholdEngine,
) -> DispatchReport {
    let thresholds = probe.thresholds();
    let timestamp = SystemTime::now();
    let mut notifications = Vec::new();

    for rule in rules.rules() {
        let mut applicable = results.iter().filter(|r| rule.applies_to(r.request_index)).peekable();
        let Some(&first) = applicable.peek() else {
            continue;
        };

        let mut last = first;
        let mut culprit = None;
        for result in applicable {
            last = result;
            if culprit.is_none() && rule.is_triggered(result) {
                culprit = Some(result);
            }
        }

        let triggered = culprit.is_some();
        let Some(direction) = engine.evaluate(&probe.id, &rule.id, triggered, thresholds) else {
            continue;
        };

        let result = match direction {
            Transition::Incident => culprit.unwrap_or(last),
            Transition::Recovery => last,
        };
        let message = if rule.rule.message.is_empty() {
            rule.assertion.source().to_string()
        } else {
            rule.rule.message.clone()
        };

        notifications.push(NotificationEvent {
            probe_id: probe.id.clone(),
            probe_name: probe.display_name().to_string(),
            alert_rule_id: rule.id.clone(),
            direction,
            message,
            result: result.clone(),
            timestamp,
        });
    }

    DispatchReport {
        records: check_records(&probe.id, rules, results),
        notifications,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe::types::{HttpRequest, ProbeSpec};
    use probe::{AlertRule, AlertStatus};
    use std::time::Duration;

    fn http_probe(incident: u32, recovery: u32, requests: Vec<HttpRequest>, alerts: Vec<AlertRule>) -> Probe {
        Probe {
            id: "api".to_string(),
            name: "API".to_string(),
            description: None,
            interval: Duration::from_secs(10),
            incident_threshold: incident,
            recovery_threshold: recovery,
            alerts,
            spec: ProbeSpec::Http(requests),
        }
    }

    fn status(index: usize, code: u16) -> ProbeResult {
        ProbeResult::with_status(index, code, Duration::from_millis(20))
    }

    #[test]
    fn test_status_sequence_scenario() {
        let probe = http_probe(
            2,
            2,
            vec![HttpRequest::get("http://example.test/")],
            vec![AlertRule::new("not-ok", "response.status != 200", "API is failing")],
        );
        let rules = RuleSet::compile(&probe).unwrap();
        let engine = AlertThresholdEngine::new();

        let mut directions = Vec::new();
        let mut statuses = Vec::new();
        for code in [200, 500, 500, 200, 200] {
            let report = evaluate_dispatch(&probe, &rules, &[status(0, code)], &engine);
            assert_eq!(report.records.len(), 1);
            directions.extend(report.notifications.iter().map(|n| (code, n.direction)));
            statuses.push(engine.state("api", "not-ok").unwrap().status);
        }

        assert_eq!(
            statuses,
            vec![
                AlertStatus::Up,
                AlertStatus::Up,
                AlertStatus::Down,
                AlertStatus::Down,
                AlertStatus::Up
            ]
        );
        assert_eq!(directions, vec![(500, Transition::Incident), (200, Transition::Recovery)]);
    }

    #[test]
    fn test_notification_carries_triggering_result() {
        let probe = http_probe(
            1,
            1,
            vec![HttpRequest::get("http://example.test/a"), HttpRequest::get("http://example.test/b")],
            vec![AlertRule::new("not-ok", "response.status != 200", "")],
        );
        let rules = RuleSet::compile(&probe).unwrap();
        let engine = AlertThresholdEngine::new();

        let report = evaluate_dispatch(&probe, &rules, &[status(0, 200), status(1, 503)], &engine);
        assert_eq!(report.notifications.len(), 1);

        let event = &report.notifications[0];
        assert_eq!(event.direction, Transition::Incident);
        assert_eq!(event.result.status, 503);
        assert_eq!(event.message, "response.status != 200");
        assert_eq!(event.probe_name, "API");

        assert!(report.records[0].triggered_rule_ids.is_empty());
        assert_eq!(report.records[1].triggered_rule_ids, vec!["not-ok".to_string()]);
    }

    #[test]
    fn test_rule_without_applicable_result_is_skipped() {
        let mut second = HttpRequest::get("http://example.test/b");
        second.alerts = vec![AlertRule::new("b-slow", "response.time > 100", "slow")];
        let probe = http_probe(
            1,
            1,
            vec![HttpRequest::get("http://example.test/a"), second],
            vec![AlertRule::new("not-ok", "response.status != 200", "down")],
        );
        let rules = RuleSet::compile(&probe).unwrap();
        let engine = AlertThresholdEngine::new();

        // Chain stopped after the first request.
        let report = evaluate_dispatch(&probe, &rules, &[status(0, 500)], &engine);
        assert_eq!(report.notifications.len(), 1);
        assert!(engine.state("api", "not-ok").is_some());
        assert!(engine.state("api", "b-slow").is_none());
    }

    #[test]
    fn test_empty_results_evaluate_nothing() {
        let probe = http_probe(1, 1, vec![HttpRequest::get("http://example.test/")], vec![]);
        let rules = RuleSet::compile(&probe).unwrap();
        let engine = AlertThresholdEngine::new();

        let report = evaluate_dispatch(&probe, &rules, &[], &engine);
        assert!(report.records.is_empty());
        assert!(report.notifications.is_empty());
        assert!(engine.is_empty());
    }
}
