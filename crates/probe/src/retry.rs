//! Bounded retry of a prober with exponential backoff.

use crate::probers::Prober;
use crate::types::{ProbeResult, Thresholds};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before `attempt` (1-based). The first attempt never waits.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay = self.initial_delay.as_secs_f64() * factor;

        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

/// Results of the final attempt of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    pub results: Vec<ProbeResult>,
    pub attempts: u32,
}

impl RetryOutcome {
    /// True when every result of the final attempt succeeded.
    pub fn succeeded(&self) -> bool {
        attempt_succeeded(&self.results)
    }
}

fn attempt_succeeded(results: &[ProbeResult]) -> bool {
    !results.is_empty() && results.iter().all(|r| r.success)
}

/// Runs a prober up to `max(incident, recovery)` times.
///
/// Attempts are sequential. A retry restarts the whole request chain.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: BackoffPolicy,
}

impl RetryExecutor {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Execute with retries, returning the final attempt's results.
    ///
    /// Exhausting the budget is not an error: the failed results are returned
    /// like any others.
    pub async fn execute(&self, prober: &dyn Prober, thresholds: Thresholds) -> RetryOutcome {
        let max_attempts = thresholds.max_attempts();
        let mut attempt = 1;

        loop {
            let results = prober.probe(attempt).await;

            if attempt_succeeded(&results) || attempt >= max_attempts {
                if attempt > 1 {
                    debug!(kind = %prober.kind(), attempt, max_attempts,
                           success = attempt_succeeded(&results), "Retry sequence finished");
                }
                return RetryOutcome {
                    results,
                    attempts: attempt,
                };
            }

            attempt += 1;
            let delay = self.policy.delay_for(attempt);
            debug!(kind = %prober.kind(), attempt, delay_ms = delay.as_millis(), "Retrying probe");
            sleep(delay).await;
        }
    }
}
