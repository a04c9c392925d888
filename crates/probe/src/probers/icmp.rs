//! ICMP echo prober.
//!
//! Raw ICMP sockets need elevated privileges, so the echo is delegated to
//! the system `ping` utility (Linux iputils flags).

use super::Prober;
use crate::types::{IcmpTarget, ProbeKind, ProbeResult};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

fn rtt_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"time[=<]\s*([0-9.]+)\s*ms").unwrap_or_else(|e| panic!("invalid rtt regex: {e}"))
    })
}

/// Round-trip time reported by `ping`, if present.
fn parse_rtt(output: &str) -> Option<Duration> {
    let caps = rtt_pattern().captures(output)?;
    let ms: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(Duration::from_secs_f64(ms / 1000.0))
}

/// ICMP prober
pub struct IcmpProber {
    probe_id: String,
    targets: Vec<IcmpTarget>,
}

impl IcmpProber {
    /// Create a new ICMP prober
    pub fn new(probe_id: &str, targets: Vec<IcmpTarget>) -> Self {
        Self {
            probe_id: probe_id.to_string(),
            targets,
        }
    }

    async fn check(&self, index: usize, target: &IcmpTarget) -> ProbeResult {
        let start = Instant::now();
        let output = ping_command(target).output();

        match timeout(target.timeout, output).await {
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let duration = parse_rtt(&stdout).unwrap_or_else(|| start.elapsed());
                debug!(probe_id = %self.probe_id, host = %target.host,
                       duration_ms = duration.as_millis(), "ICMP check successful");
                ProbeResult::alive(index, duration).with_body(Value::String(stdout))
            }
            Ok(Ok(output)) => {
                warn!(probe_id = %self.probe_id, host = %target.host, code = ?output.status.code(),
                      "ICMP check failed");
                ProbeResult::unreachable(index, start.elapsed(), "Host did not answer echo request")
                    .with_body(Value::String(String::from_utf8_lossy(&output.stdout).into_owned()))
            }
            Ok(Err(e)) => {
                warn!(probe_id = %self.probe_id, host = %target.host, error = %e,
                      "Failed to run ping");
                ProbeResult::unreachable(index, start.elapsed(), format!("Failed to run ping: {}", e))
            }
            Err(_) => {
                warn!(probe_id = %self.probe_id, host = %target.host, "ICMP check timed out");
                ProbeResult::timeout(index, start.elapsed())
            }
        }
    }
}

/// `ping` invocation for one echo; the host never parses as an option.
fn ping_command(target: &IcmpTarget) -> Command {
    let wait_secs = target.timeout.as_secs().max(1).to_string();
    let mut cmd = Command::new("ping");
    cmd.args(["-c", "1", "-W", wait_secs.as_str(), "--", target.host.as_str()])
        .stdin(Stdio::null())
        .kill_on_drop(true);
    cmd
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, attempt: u32) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(self.targets.len());
        for (index, target) in self.targets.iter().enumerate() {
            let mut result = self.check(index, target).await;
            result.attempt = attempt;
            results.push(result);
        }
        results
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Icmp
    }
}
