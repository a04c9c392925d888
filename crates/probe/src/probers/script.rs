//! External command prober.

use super::Prober;
use crate::types::{ProbeKind, ProbeResult, ScriptCommand};
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Exit status reported when the process was terminated by a signal.
const SIGNALLED_EXIT: u16 = 255;

/// Exit status reported when the command could not be started, as a shell
/// reports a missing command.
const SPAWN_FAILED_EXIT: u16 = 127;

/// Runs commands through `sh -c`.
///
/// The result status is the exit code. Chained commands stop at the first
/// non-zero exit.
pub struct ScriptProber {
    probe_id: String,
    commands: Vec<ScriptCommand>,
}

impl ScriptProber {
    /// Create a new script prober
    pub fn new(probe_id: &str, commands: Vec<ScriptCommand>) -> Self {
        Self {
            probe_id: probe_id.to_string(),
            commands,
        }
    }

    async fn run(&self, index: usize, command: &ScriptCommand) -> ProbeResult {
        let start = Instant::now();

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&command.cmd)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        match timeout(command.timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let duration = start.elapsed();
                let code = output
                    .status
                    .code()
                    .map(|c| c.clamp(0, u16::MAX as i32) as u16)
                    .unwrap_or(SIGNALLED_EXIT);
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

                let mut result =
                    ProbeResult::with_status(index, code, duration).with_body(Value::String(stdout));

                if code == 0 {
                    debug!(probe_id = %self.probe_id, cmd = %command.cmd,
                           duration_ms = duration.as_millis(), "Script succeeded");
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    warn!(probe_id = %self.probe_id, cmd = %command.cmd, code, "Script failed");
                    result = result.failed(if stderr.is_empty() {
                        format!("exit status {}", code)
                    } else {
                        stderr
                    });
                }
                result
            }
            Ok(Err(e)) => {
                warn!(probe_id = %self.probe_id, cmd = %command.cmd, error = %e, "Failed to spawn script");
                ProbeResult::with_status(index, SPAWN_FAILED_EXIT, start.elapsed())
                    .failed(format!("Failed to spawn: {}", e))
            }
            Err(_) => {
                warn!(probe_id = %self.probe_id, cmd = %command.cmd, "Script timed out");
                ProbeResult::timeout(index, start.elapsed())
            }
        }
    }
}

#[async_trait]
impl Prober for ScriptProber {
    async fn probe(&self, attempt: u32) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(self.commands.len());
        for (index, command) in self.commands.iter().enumerate() {
            let mut result = self.run(index, command).await;
            result.attempt = attempt;
            let stop = !result.success;
            results.push(result);
            if stop {
                break;
            }
        }
        results
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Script
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleSet;
    use crate::types::{Probe, ProbeSpec, STATUS_TIMEOUT};
    use std::time::Duration;

    fn command(cmd: &str) -> ScriptCommand {
        ScriptCommand {
            cmd: cmd.to_string(),
            working_dir: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_script_success() {
        let prober = ScriptProber::new("s", vec![command("echo hello")]);
        let results = prober.probe(1).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(results[0].status, 0);
        assert_eq!(results[0].body, Value::String("hello\n".to_string()));
    }

    #[tokio::test]
    async fn test_script_chain_stops_on_failure() {
        let prober = ScriptProber::new(
            "s",
            vec![command("true"), command("echo boom >&2; exit 3"), command("true")],
        );
        let results = prober.probe(1).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(results[1].status, 3);
        assert_eq!(results[1].error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_script_timeout() {
        let mut slow = command("sleep 5");
        slow.timeout = Duration::from_millis(100);
        let prober = ScriptProber::new("s", vec![slow]);
        let results = prober.probe(1).await;
        assert_eq!(results[0].status, STATUS_TIMEOUT);
        assert!(!results[0].success);
    }

    #[tokio::test]
    async fn test_spawn_failure_triggers_default_rule() {
        let mut missing_dir = command("true");
        missing_dir.working_dir = Some("/nonexistent/scripts".into());

        let probe = Probe {
            id: "nightly".to_string(),
            name: String::new(),
            description: None,
            interval: Duration::from_secs(60),
            incident_threshold: 1,
            recovery_threshold: 1,
            alerts: vec![],
            spec: ProbeSpec::Script(vec![missing_dir.clone()]),
        };
        let rules = RuleSet::compile(&probe).unwrap();

        let prober = ScriptProber::new("nightly", vec![missing_dir]);
        let results = prober.probe(1).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].status, SPAWN_FAILED_EXIT);
        assert!(results[0].error.as_deref().unwrap().starts_with("Failed to spawn"));

        let triggered: Vec<_> = rules.triggered(&results[0]).into_iter().map(|r| r.id.clone()).collect();
        assert_eq!(triggered, vec!["script-failed".to_string()]);
    }
}
