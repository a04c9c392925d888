//! Configuration loading and validation for the probe agent

use crate::store::ProbeSet;
use crate::types::AgentSettings;
use probe::{BackoffPolicy, Probe};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "PROBE_AGENT_CONFIG";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid probe definition: {0}")]
    ProbeError(#[from] common::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub connectivity: ConnectivitySettings,

    #[serde(default)]
    pub batching: BatchingSettings,

    #[serde(default)]
    pub channels: ChannelSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub probes: Vec<Probe>,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.scheduler.validate()?;
        self.retry.validate()?;
        self.connectivity.validate()?;
        self.batching.validate()?;
        self.channels.validate()?;
        Ok(())
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SchedulerSettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_tick")]
    pub tick: Duration,

    #[validate(custom = "validate_jitter")]
    pub jitter: Vec<JitterDelay>,

    /// Cycles per probe before the agent exits; 0 runs forever
    pub repeat: u32,

    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

/// One jitter choice, written as a humantime duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JitterDelay(#[serde(with = "humantime_serde")] pub Duration);

/// Retry backoff settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_retry_delays"))]
pub struct RetrySettings {
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    #[validate(range(min = 1.0, max = 10.0))]
    pub multiplier: f64,
}

/// STUN connectivity gate settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConnectivitySettings {
    pub enabled: bool,

    #[validate(length(min = 1))]
    pub stun_server: String,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_nonzero")]
    pub check_interval: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_nonzero")]
    pub timeout: Duration,
}

/// Notification batching settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BatchingSettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_batch_delay")]
    pub delay: Duration,

    #[validate(range(min = 1, max = 10000))]
    pub max_size: usize,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_nonzero")]
    pub sink_timeout: Duration,
}

/// Channel buffer size settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ChannelSettings {
    #[validate(range(min = 10, max = 100000))]
    pub notification: usize,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

// Default implementations

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            jitter: [1, 2, 3]
                .into_iter()
                .map(|s| JitterDelay(Duration::from_secs(s)))
                .collect(),
            repeat: 0,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            initial_delay: policy.initial_delay,
            max_delay: policy.max_delay,
            multiplier: policy.multiplier,
        }
    }
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            stun_server: "stun.l.google.com:19302".to_string(),
            check_interval: Duration::from_secs(20),
            timeout: Duration::from_secs(5),
        }
    }
}

impl Default for BatchingSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
            max_size: 100,
            sink_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self { notification: 1000 }
    }
}

// Custom validators

fn validate_tick(tick: &Duration) -> Result<(), ValidationError> {
    let millis = tick.as_millis();
    if !(10..=60_000).contains(&millis) {
        return Err(ValidationError::new("tick_out_of_range"));
    }
    Ok(())
}

fn validate_jitter(jitter: &[JitterDelay]) -> Result<(), ValidationError> {
    if jitter.iter().any(|j| j.0 > Duration::from_secs(60)) {
        return Err(ValidationError::new("jitter_too_large"));
    }
    Ok(())
}

fn validate_retry_delays(retry: &RetrySettings) -> Result<(), ValidationError> {
    if retry.max_delay < retry.initial_delay {
        return Err(ValidationError::new("max_delay_below_initial_delay"));
    }
    Ok(())
}

fn validate_nonzero(duration: &Duration) -> Result<(), ValidationError> {
    if duration.is_zero() {
        return Err(ValidationError::new("duration_zero"));
    }
    Ok(())
}

fn validate_batch_delay(delay: &Duration) -> Result<(), ValidationError> {
    let millis = delay.as_millis();
    if !(1..=10_000).contains(&millis) {
        return Err(ValidationError::new("batch_delay_out_of_range"));
    }
    Ok(())
}

// Configuration loading implementation

impl Config {
    /// Load configuration from default search paths
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if !path.is_file() {
                return Err(ConfigError::FileNotFound(path));
            }
            tracing::info!("Loading configuration from: {}", path.display());
            return Self::load_from_file(&path);
        }

        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/probe-agent/probe-agent.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./probe-agent.yaml"));

        paths.into_iter().find(|p: &PathBuf| p.exists() && p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/probe-agent/probe-agent.yaml"))
    }

    /// Validate the configured probes and build their probers
    pub fn probe_set(&self) -> Result<ProbeSet, ConfigError> {
        Ok(ProbeSet::build(self.probes.clone())?)
    }

    /// Convert to the runtime settings
    pub fn to_agent_settings(&self) -> AgentSettings {
        AgentSettings {
            tick: self.scheduler.tick,
            jitter: self.scheduler.jitter.iter().map(|j| j.0).collect(),
            repeat: self.scheduler.repeat,
            shutdown_grace: self.scheduler.shutdown_grace,
            backoff: BackoffPolicy {
                initial_delay: self.retry.initial_delay,
                max_delay: self.retry.max_delay,
                multiplier: self.retry.multiplier,
            },
            connectivity_enabled: self.connectivity.enabled,
            stun_server: self.connectivity.stun_server.clone(),
            connectivity_interval: self.connectivity.check_interval,
            connectivity_timeout: self.connectivity.timeout,
            batch_delay: self.batching.delay,
            batch_size: self.batching.max_size,
            sink_timeout: self.batching.sink_timeout,
            channel_size: self.channels.notification,
        }
    }
}
