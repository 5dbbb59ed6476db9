//! Configuration Module
//!
//! Provides TOML-based configuration for FleetBridge with support for:
//! - Broker settings (host, port, topics, keepalive)
//! - Queue settings (service URL, endpoint override, region, credentials)
//! - Message limits
//! - Environment variable overrides (FLEETBRIDGE__* prefix, plus the
//!   well-known SQS_QUEUE_URL and LOCALSTACK_ENDPOINT variables)

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

/// Environment variable overriding the queue service URL
pub const ENV_QUEUE_URL: &str = "SQS_QUEUE_URL";

/// Environment variable overriding the queue endpoint (local emulators)
pub const ENV_QUEUE_ENDPOINT: &str = "LOCALSTACK_ENDPOINT";

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[cfg(test)]
mod tests;

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Broker connection configuration
    pub broker: BrokerConfig,
    /// Queue service configuration
    pub queue: QueueConfig,
    /// Message limits
    pub limits: LimitsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Broker connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker hostname
    #[serde(default = "default_broker_host")]
    pub host: String,
    /// Broker port
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// Client ID used when connecting
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive: u16,
    /// Connection timeout
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    /// Topics to subscribe to
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
    /// QoS requested for subscriptions (0 or 1)
    #[serde(default)]
    pub qos: u8,
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    format!("fleetbridge-{}", std::process::id())
}

fn default_keepalive() -> u16 {
    60
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_topics() -> Vec<String> {
    vec![
        "sensor/gyroscope".to_string(),
        "sensor/gps".to_string(),
        "sensor/photo".to_string(),
    ]
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            client_id: default_client_id(),
            keepalive: default_keepalive(),
            connect_timeout: default_connect_timeout(),
            topics: default_topics(),
            qos: 0,
        }
    }
}

impl BrokerConfig {
    /// Broker address as host:port
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Keep-alive interval as Duration
    pub fn keepalive_duration(&self) -> Duration {
        Duration::from_secs(self.keepalive as u64)
    }
}

/// Queue service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue URL messages are sent to
    #[serde(default = "default_queue_url")]
    pub url: String,
    /// Alternate endpoint override for local/test deployments.
    /// When set, requests are POSTed here instead of the queue URL host.
    pub endpoint: Option<String>,
    /// Region identifier
    #[serde(default = "default_region")]
    pub region: String,
    /// Access key (placeholder credential for local emulators)
    #[serde(default = "default_credential")]
    pub access_key: String,
    /// Upper bound on a single send request
    #[serde(with = "humantime_serde", default = "default_send_timeout")]
    pub send_timeout: Duration,
}

fn default_queue_url() -> String {
    "http://localhost:4566/000000000000/telemetry".to_string()
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_credential() -> String {
    "dummy".to_string()
}

fn default_send_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: default_queue_url(),
            endpoint: None,
            region: default_region(),
            access_key: default_credential(),
            send_timeout: default_send_timeout(),
        }
    }
}

/// Message limits configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum inbound payload size in bytes (0 = unbounded).
    /// Defaults to the 256 KiB queue message body ceiling.
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
    /// Inbound delivery channel capacity
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_max_payload_size() -> usize {
    256 * 1024
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payload_size: default_max_payload_size(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports three forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `FLEETBRIDGE__` prefix with double underscores
    ///    for nesting, e.g. `FLEETBRIDGE__BROKER__HOST=mosquitto` overrides
    ///    `broker.host`
    /// 3. The well-known `SQS_QUEUE_URL` and `LOCALSTACK_ENDPOINT` variables,
    ///    which override `queue.url` and `queue.endpoint` respectively
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("broker.host", "localhost")?
            .set_default("broker.port", 1883)?
            .set_default("broker.client_id", default_client_id())?
            .set_default("broker.keepalive", 60)?
            .set_default("broker.connect_timeout", "30s")?
            .set_default("broker.topics", default_topics())?
            .set_default("broker.qos", 0)?
            .set_default("queue.url", default_queue_url())?
            .set_default("queue.region", default_region())?
            .set_default("queue.access_key", "dummy")?
            .set_default("queue.send_timeout", "10s")?
            .set_default("limits.max_payload_size", 256 * 1024)?
            .set_default("limits.channel_capacity", 256)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Override with environment variables (FLEETBRIDGE__BROKER__HOST, etc.)
        // Double underscore separates nested keys, single underscore preserved
        let cfg = builder
            .add_source(
                Environment::with_prefix("FLEETBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = cfg.try_deserialize()?;

        // The two well-known process variables win over everything
        if let Ok(url) = std::env::var(ENV_QUEUE_URL) {
            if !url.is_empty() {
                config.queue.url = url;
            }
        }
        if let Ok(endpoint) = std::env::var(ENV_QUEUE_ENDPOINT) {
            if !endpoint.is_empty() {
                config.queue.endpoint = Some(endpoint);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    ///
    /// Useful for containerized deployments where all config comes from env vars.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.topics.is_empty() {
            return Err(ConfigError::Validation(
                "broker.topics must not be empty".to_string(),
            ));
        }

        // Type derivation needs concrete topic names, not filters
        for topic in &self.broker.topics {
            if topic.is_empty() {
                return Err(ConfigError::Validation(
                    "broker.topics entries must not be empty".to_string(),
                ));
            }
            if topic.contains('#') || topic.contains('+') {
                return Err(ConfigError::Validation(format!(
                    "topic '{}' contains a wildcard; subscription topics must be concrete",
                    topic
                )));
            }
        }

        if self.broker.qos > 1 {
            return Err(ConfigError::Validation(
                "broker.qos must be 0 or 1".to_string(),
            ));
        }

        if self.queue.url.is_empty() {
            return Err(ConfigError::Validation(
                "queue.url must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
