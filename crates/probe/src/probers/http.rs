//! HTTP prober with response chaining.

use super::Prober;
use crate::rules::RuleSet;
use crate::template::ResponseContext;
use crate::types::{HttpRequest, ProbeKind, ProbeResult};
use async_trait::async_trait;
use common::{Error, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, warn};

struct PreparedRequest {
    spec: HttpRequest,
    method: reqwest::Method,
    client: reqwest::Client,
}

/// Executes a probe's request list in order.
///
/// Later requests may reference earlier responses. The chain stops at the
/// first request that fails or triggers one of its alert rules.
pub struct HttpProber {
    probe_id: String,
    requests: Vec<PreparedRequest>,
    rules: Arc<RuleSet>,
}

impl HttpProber {
    /// Create a new HTTP prober
    pub fn new(probe_id: &str, requests: &[HttpRequest], rules: Arc<RuleSet>) -> Result<Self> {
        let requests = requests
            .iter()
            .map(|spec| {
                let method = reqwest::Method::from_bytes(spec.method.to_uppercase().as_bytes())
                    .map_err(|e| {
                        Error::config(format!("invalid HTTP method '{}': {}", spec.method, e))
                    })?;

                let redirect = if spec.follow_redirects == 0 {
                    reqwest::redirect::Policy::none()
                } else {
                    reqwest::redirect::Policy::limited(spec.follow_redirects as usize)
                };

                let client = reqwest::Client::builder()
                    .timeout(spec.timeout)
                    .redirect(redirect)
                    .danger_accept_invalid_certs(spec.allow_unauthorized)
                    .build()
                    .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

                Ok(PreparedRequest {
                    spec: spec.clone(),
                    method,
                    client,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            probe_id: probe_id.to_string(),
            requests,
            rules,
        })
    }

    async fn execute(
        &self,
        index: usize,
        request: &PreparedRequest,
        context: &ResponseContext,
    ) -> ProbeResult {
        let url = context.render(&request.spec.url);
        let start = Instant::now();

        let mut builder = request.client.request(request.method.clone(), &url);
        for (name, value) in &request.spec.headers {
            builder = builder.header(name.as_str(), context.render(value));
        }
        builder = match request.spec.body.as_ref().map(|b| context.render_value(b)) {
            Some(Value::String(text)) => builder.body(text),
            Some(body) => builder.json(&body),
            None => builder,
        };

        let call = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers: BTreeMap<String, String> = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_lowercase(), v.to_string()))
                })
                .collect();
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, headers, bytes))
        };

        match timeout(request.spec.timeout, call).await {
            Ok(Ok((status, headers, bytes))) => {
                let duration = start.elapsed();
                let body = serde_json::from_slice::<Value>(&bytes)
                    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));

                debug!(probe_id = %self.probe_id, url = %url, status, duration_ms = duration.as_millis(),
                       "HTTP request completed");

                let mut result = ProbeResult::with_status(index, status, duration).with_body(body);
                result.size = bytes.len();
                result.headers = headers;
                result
            }
            Ok(Err(e)) if e.is_timeout() => {
                warn!(probe_id = %self.probe_id, url = %url, "HTTP request timed out");
                ProbeResult::timeout(index, start.elapsed())
            }
            Ok(Err(e)) => {
                warn!(probe_id = %self.probe_id, url = %url, error = %e, "HTTP request failed");
                ProbeResult::unreachable(index, start.elapsed(), format!("HTTP request failed: {}", e))
            }
            Err(_) => {
                warn!(probe_id = %self.probe_id, url = %url, "HTTP request timed out");
                ProbeResult::timeout(index, start.elapsed())
            }
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, attempt: u32) -> Vec<ProbeResult> {
        let mut context = ResponseContext::new();
        let mut results = Vec::with_capacity(self.requests.len());

        for (index, request) in self.requests.iter().enumerate() {
            let mut result = self.execute(index, request, &context).await;
            result.attempt = attempt;

            if result.success && self.rules.any_triggered(&result) {
                result.success = false;
            }

            let stop = !result.success;
            context.push(&result);
            results.push(result);

            if stop {
                if index + 1 < self.requests.len() {
                    debug!(probe_id = %self.probe_id, index, "Stopping request chain");
                }
                break;
            }
        }

        results
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Http
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertRule, Probe, ProbeSpec, STATUS_UNREACHABLE};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn prober(requests: Vec<HttpRequest>, alerts: Vec<AlertRule>) -> HttpProber {
        let probe = Probe {
            id: "web".to_string(),
            name: String::new(),
            description: None,
            interval: Duration::from_secs(10),
            incident_threshold: 1,
            recovery_threshold: 1,
            alerts,
            spec: ProbeSpec::Http(requests.clone()),
        };
        let rules = Arc::new(RuleSet::compile(&probe).unwrap());
        HttpProber::new("web", &requests, rules).unwrap()
    }

    /// Serve fixed responses, one per connection, and record request lines.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap();
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                seen.push(request.lines().next().unwrap_or_default().to_string());
                let reply = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
            }
            seen
        });
        (format!("http://{}", addr), handle)
    }

    #[tokio::test]
    async fn test_http_prober_connection_refused() {
        let mut request = HttpRequest::get("http://127.0.0.1:1/health");
        request.timeout = Duration::from_millis(500);
        let prober = prober(vec![request], vec![]);

        let results = prober.probe(2).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].status, STATUS_UNREACHABLE);
        assert_eq!(results[0].attempt, 2);
    }

    #[tokio::test]
    async fn test_http_prober_chains_responses() {
        let (base, server) = serve(vec![(200, r#"{"token":"abc","id":7}"#), (200, r#"{"ok":true}"#)]).await;

        let first = HttpRequest::get(format!("{}/login", base));
        let mut second = HttpRequest::get(format!("{}/users/{{{{ responses.[0].data.id }}}}", base));
        second
            .headers
            .insert("authorization".into(), "Bearer {{ responses.[0].data.token }}".into());

        let prober = prober(
            vec![first, second],
            vec![AlertRule::new("down", "response.status != 200", "down")],
        );
        let results = prober.probe(1).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(results[1].body["ok"], true);

        let seen = server.await.unwrap();
        assert_eq!(seen[1], "GET /users/7 HTTP/1.1");
    }

    #[tokio::test]
    async fn test_http_prober_stops_on_triggered_alert() {
        let (base, _server) = serve(vec![(500, "{}")]).await;

        let prober = prober(
            vec![
                HttpRequest::get(format!("{}/a", base)),
                HttpRequest::get(format!("{}/b", base)),
            ],
            vec![AlertRule::new("down", "response.status != 200", "down")],
        );
        let results = prober.probe(1).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, 500);
        assert!(!results[0].success);
    }
}
