//! Probe definitions and normalized probe results.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Status reported by non-HTTP probers when the target answered.
pub const STATUS_ALIVE: u16 = 200;

/// Status reported when the target could not be reached at all.
pub const STATUS_UNREACHABLE: u16 = 0;

/// Status reported when a protocol call exceeded its timeout.
pub const STATUS_TIMEOUT: u16 = 599;

/// Default number of consecutive results needed to flip an alert.
pub const DEFAULT_THRESHOLD: u32 = 5;

fn default_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_threshold() -> u32 {
    DEFAULT_THRESHOLD
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_redirects() -> u32 {
    21
}

/// A configured monitoring target.
///
/// Probes are immutable once built into a probe set; a configuration reload
/// replaces them wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    /// Unique probe identifier
    pub id: String,

    /// Human readable name
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Time between the end of one check and the start of the next
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,

    /// Consecutive triggered evaluations before an incident is raised
    #[serde(default = "default_threshold")]
    pub incident_threshold: u32,

    /// Consecutive clear evaluations before a recovery is raised
    #[serde(default = "default_threshold")]
    pub recovery_threshold: u32,

    /// Probe-level alert rules, applied to every request or target
    #[serde(default)]
    pub alerts: Vec<AlertRule>,

    /// Protocol specific request or target list
    #[serde(flatten)]
    pub spec: ProbeSpec,
}

impl Probe {
    /// Threshold pair for this probe.
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            incident: self.incident_threshold,
            recovery: self.recovery_threshold,
        }
    }

    /// Name used in logs and notifications.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Protocol-specific part of a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProbeSpec {
    /// Ordered, optionally chained HTTP requests
    #[serde(rename = "requests")]
    Http(Vec<HttpRequest>),

    /// TCP socket targets
    #[serde(rename = "socket")]
    Tcp(Vec<TcpTarget>),

    /// ICMP echo targets
    #[serde(rename = "ping")]
    Icmp(Vec<IcmpTarget>),

    #[serde(rename = "postgres")]
    Postgres(Vec<DatabaseTarget>),

    #[serde(rename = "mysql")]
    Mysql(Vec<DatabaseTarget>),

    #[serde(rename = "mariadb")]
    Mariadb(Vec<DatabaseTarget>),

    #[serde(rename = "mongo")]
    Mongo(Vec<DatabaseTarget>),

    #[serde(rename = "redis")]
    Redis(Vec<DatabaseTarget>),

    /// External commands
    #[serde(rename = "script")]
    Script(Vec<ScriptCommand>),
}

impl ProbeSpec {
    /// Protocol of this spec.
    pub fn kind(&self) -> ProbeKind {
        match self {
            ProbeSpec::Http(_) => ProbeKind::Http,
            ProbeSpec::Tcp(_) => ProbeKind::Tcp,
            ProbeSpec::Icmp(_) => ProbeKind::Icmp,
            ProbeSpec::Postgres(_) => ProbeKind::Postgres,
            ProbeSpec::Mysql(_) => ProbeKind::Mysql,
            ProbeSpec::Mariadb(_) => ProbeKind::Mariadb,
            ProbeSpec::Mongo(_) => ProbeKind::Mongo,
            ProbeSpec::Redis(_) => ProbeKind::Redis,
            ProbeSpec::Script(_) => ProbeKind::Script,
        }
    }

    /// Number of requests or targets.
    pub fn len(&self) -> usize {
        match self {
            ProbeSpec::Http(r) => r.len(),
            ProbeSpec::Tcp(t) => t.len(),
            ProbeSpec::Icmp(t) => t.len(),
            ProbeSpec::Postgres(t)
            | ProbeSpec::Mysql(t)
            | ProbeSpec::Mariadb(t)
            | ProbeSpec::Mongo(t)
            | ProbeSpec::Redis(t) => t.len(),
            ProbeSpec::Script(c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Protocol family of a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Http,
    Tcp,
    Icmp,
    Postgres,
    Mysql,
    Mariadb,
    Mongo,
    Redis,
    Script,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeKind::Http => "http",
            ProbeKind::Tcp => "tcp",
            ProbeKind::Icmp => "icmp",
            ProbeKind::Postgres => "postgres",
            ProbeKind::Mysql => "mysql",
            ProbeKind::Mariadb => "mariadb",
            ProbeKind::Mongo => "mongo",
            ProbeKind::Redis => "redis",
            ProbeKind::Script => "script",
        };
        f.write_str(name)
    }
}

/// A single HTTP request in a probe's chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    /// Target URL, may contain `{{ responses.[i]... }}` references
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// JSON body; a string value is sent as-is
    #[serde(default)]
    pub body: Option<Value>,

    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    /// Maximum redirects to follow, 0 disables redirects
    #[serde(default = "default_redirects")]
    pub follow_redirects: u32,

    /// Accept invalid TLS certificates
    #[serde(default)]
    pub allow_unauthorized: bool,

    /// Request-level alert rules
    #[serde(default)]
    pub alerts: Vec<AlertRule>,
}

impl HttpRequest {
    /// Create a GET request with default options.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
            timeout: default_timeout(),
            follow_redirects: default_redirects(),
            allow_unauthorized: false,
            alerts: Vec::new(),
        }
    }
}

/// TCP socket target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpTarget {
    pub host: String,
    pub port: u16,

    /// Payload written after connecting; the reply becomes the body
    #[serde(default)]
    pub data: Option<String>,

    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
}

/// ICMP echo target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcmpTarget {
    #[serde(alias = "uri")]
    pub host: String,

    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
}

/// Database target shared by all database probers.
///
/// Either `uri` or the discrete connection fields are used.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseTarget {
    #[serde(default)]
    pub uri: Option<String>,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub database: Option<String>,

    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
}

impl DatabaseTarget {
    /// Host, defaulting to localhost.
    pub fn host_or_default(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }

    /// Short description for logs, never includes credentials.
    pub fn describe(&self, default_port: u16) -> String {
        match &self.uri {
            Some(_) => "uri".to_string(),
            None => format!(
                "{}:{}",
                self.host_or_default(),
                self.port.unwrap_or(default_port)
            ),
        }
    }
}

/// External command run by the script prober
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptCommand {
    pub cmd: String,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
}

/// Alert rule: an assertion over a probe result plus a human message.
///
/// The rule is "triggered" when the assertion evaluates to true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Rule identifier, defaults to the assertion text
    #[serde(default)]
    pub id: String,

    #[serde(alias = "query")]
    pub assertion: String,

    #[serde(default)]
    pub message: String,
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        assertion: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            assertion: assertion.into(),
            message: message.into(),
        }
    }

    /// Identifier used for alert state, falling back to the assertion.
    pub fn key(&self) -> &str {
        if self.id.is_empty() {
            &self.assertion
        } else {
            &self.id
        }
    }
}

/// Incident/recovery threshold pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub incident: u32,
    pub recovery: u32,
}

impl Thresholds {
    pub fn new(incident: u32, recovery: u32) -> Self {
        Self { incident, recovery }
    }

    /// Attempt budget for one dispatch.
    pub fn max_attempts(&self) -> u32 {
        self.incident.max(self.recovery).max(1)
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_THRESHOLD)
    }
}

/// Normalized result of one request or target within a probe invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Position of the request/target within the probe
    pub request_index: usize,

    /// Whether the call completed without error and without a triggered alert
    pub success: bool,

    /// HTTP status, exit code, or liveness status
    pub status: u16,

    #[serde(with = "humantime_serde")]
    pub response_time: Duration,

    /// Response size in bytes
    pub size: usize,

    pub body: Value,

    /// Response headers, lower-cased names
    pub headers: BTreeMap<String, String>,

    pub error: Option<String>,

    /// Attempt (1-based) that produced this result
    pub attempt: u32,
}

impl ProbeResult {
    fn base(request_index: usize, status: u16, response_time: Duration) -> Self {
        Self {
            request_index,
            success: true,
            status,
            response_time,
            size: 0,
            body: Value::Null,
            headers: BTreeMap::new(),
            error: None,
            attempt: 1,
        }
    }

    /// Target answered.
    pub fn alive(request_index: usize, response_time: Duration) -> Self {
        Self::base(request_index, STATUS_ALIVE, response_time)
    }

    /// Target answered with a specific status (HTTP status or exit code).
    pub fn with_status(request_index: usize, status: u16, response_time: Duration) -> Self {
        Self::base(request_index, status, response_time)
    }

    /// Target could not be reached.
    pub fn unreachable(
        request_index: usize,
        response_time: Duration,
        message: impl Into<String>,
    ) -> Self {
        let mut result = Self::base(request_index, STATUS_UNREACHABLE, response_time);
        result.success = false;
        result.error = Some(message.into());
        result
    }

    /// Protocol call timed out.
    pub fn timeout(request_index: usize, response_time: Duration) -> Self {
        let mut result = Self::base(request_index, STATUS_TIMEOUT, response_time);
        result.success = false;
        result.error = Some("Probe timed out".to_string());
        result
    }

    /// Attach a body, updating the size when the body is text.
    pub fn with_body(mut self, body: Value) -> Self {
        if let Value::String(s) = &body {
            self.size = s.len();
        }
        self.body = body;
        self
    }

    /// Mark the result failed with a message.
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(message.into());
        self
    }

    pub fn response_time_ms(&self) -> u64 {
        self.response_time.as_millis() as u64
    }

    /// Evaluation context for alert assertions.
    pub fn assertion_context(&self) -> Value {
        json!({
            "response": {
                "status": self.status,
                "time": self.response_time_ms(),
                "size": self.size,
                "body": self.body,
                "headers": self.headers,
                "error": self.error,
            }
        })
    }
}
