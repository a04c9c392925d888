//! TCP socket prober.

use super::Prober;
use crate::types::{ProbeKind, ProbeResult, TcpTarget};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

const MAX_REPLY_BYTES: usize = 64 * 1024;

/// TCP prober
///
/// Success is liveness: the connection opened (and, when a payload is
/// configured, the payload was written and a reply read).
pub struct TcpProber {
    probe_id: String,
    targets: Vec<TcpTarget>,
}

impl TcpProber {
    /// Create a new TCP prober
    pub fn new(probe_id: &str, targets: Vec<TcpTarget>) -> Self {
        Self {
            probe_id: probe_id.to_string(),
            targets,
        }
    }

    async fn check(&self, index: usize, target: &TcpTarget) -> ProbeResult {
        let start = Instant::now();

        let exchange = async {
            let mut stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
            let mut reply = Vec::new();
            if let Some(data) = &target.data {
                stream.write_all(data.as_bytes()).await?;
                let mut buf = vec![0u8; MAX_REPLY_BYTES];
                let n = stream.read(&mut buf).await?;
                reply.extend_from_slice(&buf[..n]);
            }
            Ok::<_, std::io::Error>(reply)
        };

        match timeout(target.timeout, exchange).await {
            Ok(Ok(reply)) => {
                let duration = start.elapsed();
                debug!(probe_id = %self.probe_id, host = %target.host, port = target.port,
                       duration_ms = duration.as_millis(), "TCP check successful");
                let mut result = ProbeResult::alive(index, duration);
                if !reply.is_empty() {
                    result = result.with_body(Value::String(String::from_utf8_lossy(&reply).into_owned()));
                    result.size = reply.len();
                }
                result
            }
            Ok(Err(e)) => {
                warn!(probe_id = %self.probe_id, host = %target.host, port = target.port, error = %e,
                      "TCP check failed");
                ProbeResult::unreachable(index, start.elapsed(), format!("Connection failed: {}", e))
            }
            Err(_) => {
                warn!(probe_id = %self.probe_id, host = %target.host, port = target.port,
                      "TCP check timed out");
                ProbeResult::timeout(index, start.elapsed())
            }
        }
    }
}

#[async_trait]
impl Prober for TcpProber {
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
        ProbeKind::Tcp
    }
}
