//! Protocol probers.
//!
//! Every prober returns one normalized [`ProbeResult`] per request or
//! target. Failures and timeouts are results, never errors.

mod database;
mod http;
mod icmp;
mod script;
mod tcp;

pub use database::DatabaseProber;
pub use http::HttpProber;
pub use icmp::IcmpProber;
pub use script::ScriptProber;
pub use tcp::TcpProber;

use crate::rules::RuleSet;
use crate::types::{Probe, ProbeKind, ProbeResult, ProbeSpec};
use async_trait::async_trait;
use common::{Error, Result};
use std::sync::Arc;

/// Executes one protocol-specific check.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Prober: Send + Sync {
    /// Run the check once. `attempt` is 1-based and is stamped on every result.
    async fn probe(&self, attempt: u32) -> Vec<ProbeResult>;

    /// Protocol of this prober.
    fn kind(&self) -> ProbeKind;
}

/// Build the prober for a probe.
///
/// Fails when the probe has no requests or targets, or when a request
/// cannot be prepared (unknown HTTP method, client construction failure).
pub fn build(probe: &Probe, rules: Arc<RuleSet>) -> Result<Arc<dyn Prober>> {
    if probe.spec.is_empty() {
        return Err(Error::config(format!(
            "probe '{}' has no {} requests or targets",
            probe.id,
            probe.spec.kind()
        )));
    }

    let prober: Arc<dyn Prober> = match &probe.spec {
        ProbeSpec::Http(requests) => Arc::new(HttpProber::new(&probe.id, requests, rules)?),
        ProbeSpec::Tcp(targets) => Arc::new(TcpProber::new(&probe.id, targets.clone())),
        ProbeSpec::Icmp(targets) => Arc::new(IcmpProber::new(&probe.id, targets.clone())),
        ProbeSpec::Script(commands) => Arc::new(ScriptProber::new(&probe.id, commands.clone())),
        ProbeSpec::Postgres(targets)
        | ProbeSpec::Mysql(targets)
        | ProbeSpec::Mariadb(targets)
        | ProbeSpec::Mongo(targets)
        | ProbeSpec::Redis(targets) => Arc::new(DatabaseProber::new(
            &probe.id,
            probe.spec.kind(),
            targets.clone(),
        )?),
    };

    Ok(prober)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DatabaseTarget, HttpRequest, TcpTarget};
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn probe(spec: ProbeSpec) -> Probe {
        Probe {
            id: "p".to_string(),
            name: String::new(),
            description: None,
            interval: Duration::from_secs(10),
            incident_threshold: 1,
            recovery_threshold: 1,
            alerts: vec![],
            spec,
        }
    }

    fn build_for(spec: ProbeSpec) -> Result<Arc<dyn Prober>> {
        let probe = probe(spec);
        let rules = Arc::new(RuleSet::compile(&probe)?);
        build(&probe, rules)
    }

    #[test]
    fn test_build_rejects_empty_targets() {
        let err = build_for(ProbeSpec::Tcp(vec![])).err().unwrap();
        assert!(err.is_config());
        assert!(build_for(ProbeSpec::Http(vec![])).is_err());
        assert!(build_for(ProbeSpec::Redis(vec![])).is_err());
    }

    #[test]
    fn test_build_selects_variant() {
        let tcp = assert_ok!(build_for(ProbeSpec::Tcp(vec![TcpTarget {
            host: "127.0.0.1".into(),
            port: 1,
            data: None,
            timeout: Duration::from_millis(100),
        }])));
        assert_eq!(tcp.kind(), ProbeKind::Tcp);

        let http = assert_ok!(build_for(ProbeSpec::Http(vec![HttpRequest::get("http://127.0.0.1:1/")])));
        assert_eq!(http.kind(), ProbeKind::Http);

        let redis = assert_ok!(build_for(ProbeSpec::Redis(vec![DatabaseTarget::default()])));
        assert_eq!(redis.kind(), ProbeKind::Redis);
    }

    #[test]
    fn test_build_rejects_bad_method() {
        let mut request = HttpRequest::get("http://127.0.0.1:1/");
        request.method = "NOT A METHOD".to_string();
        assert!(build_for(ProbeSpec::Http(vec![request])).is_err());
    }
}
