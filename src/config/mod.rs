//! Configuration module
//!
//! TOML-based configuration for the gateway with support for:
//! - Gateway identity and MQTT-SN parameters
//! - Broker uplink settings
//! - Sensor-network bind/multicast addresses
//! - Event-queue depths
//! - Static forwarder and QoS -1 sender declarations
//! - Environment variable overrides (SNGATE_* prefix)

use std::net::SocketAddrV4;
use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

#[cfg(test)]
mod tests;

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
    /// Gateway identity and client policy
    pub gateway: GatewayConfig,
    /// Sensor-network transport
    pub sensor: SensorConfig,
    /// Broker uplink
    pub broker: BrokerConfig,
    /// Event-queue depths
    pub queues: QueueConfig,
    /// Statically declared forwarders
    #[serde(default)]
    pub forwarder: Vec<ForwarderConfig>,
    /// Statically declared QoS -1 senders
    #[serde(default)]
    pub qos_minus_one_client: Vec<QoSm1ClientConfig>,
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

/// Gateway identity and client policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// One-octet gateway id carried in ADVERTISE/GWINFO
    #[serde(default = "default_gateway_id")]
    pub gateway_id: u8,
    /// Seconds between ADVERTISE broadcasts (also advertised as the
    /// gateway's keep-alive)
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u16,
    /// MQTT protocol level for the uplink: 3, 4 or 5
    #[serde(default = "default_mqtt_version")]
    pub mqtt_version: u8,
    /// Default broker credentials, used when a client supplies none
    pub login_id: Option<String>,
    pub password: Option<String>,
    /// Forbid address rebinding and reject unknown ClientIds
    #[serde(default)]
    pub client_authentication: bool,
    /// Multiplex all clients over one broker connection
    #[serde(default)]
    pub aggregator: bool,
    /// Accept QoS -1 publishes from the configured senders
    #[serde(default)]
    pub qos_minus_one: bool,
    /// Split the ClientId into login and password octets
    #[serde(default)]
    pub client_id_to_user_password: bool,
    /// Login octets for the ClientId split
    #[serde(default = "default_imei_len")]
    pub imei_len: usize,
    /// Password octets for the ClientId split
    #[serde(default = "default_pw_len")]
    pub pw_len: usize,
    /// Registry capacity
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Roster file path (optional)
    pub roster_file: Option<String>,
    /// Pre-defined topics file path (optional)
    pub predefined_topics_file: Option<String>,
    /// Hard deadline for draining tasks on shutdown
    #[serde(default = "default_shutdown_deadline", with = "humantime_serde")]
    pub shutdown_deadline: Duration,
}

fn default_gateway_id() -> u8 {
    1
}
fn default_keep_alive() -> u16 {
    900
}
fn default_mqtt_version() -> u8 {
    4
}
fn default_imei_len() -> usize {
    15
}
fn default_pw_len() -> usize {
    8
}
fn default_max_clients() -> usize {
    1024
}
fn default_shutdown_deadline() -> Duration {
    Duration::from_secs(5)
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_id: default_gateway_id(),
            keep_alive: default_keep_alive(),
            mqtt_version: default_mqtt_version(),
            login_id: None,
            password: None,
            client_authentication: false,
            aggregator: false,
            qos_minus_one: false,
            client_id_to_user_password: false,
            imei_len: default_imei_len(),
            pw_len: default_pw_len(),
            max_clients: default_max_clients(),
            roster_file: None,
            predefined_topics_file: None,
            shutdown_deadline: default_shutdown_deadline(),
        }
    }
}

/// Sensor-network transport configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Unicast bind address
    #[serde(default = "default_sensor_bind")]
    pub bind: SocketAddrV4,
    /// Multicast group for SEARCHGW/ADVERTISE
    #[serde(default = "default_multicast_group")]
    pub multicast_group: SocketAddrV4,
}

fn default_sensor_bind() -> SocketAddrV4 {
    "0.0.0.0:10000".parse().unwrap()
}

fn default_multicast_group() -> SocketAddrV4 {
    "225.1.1.1:1883".parse().unwrap()
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            bind: default_sensor_bind(),
            multicast_group: default_multicast_group(),
        }
    }
}

/// Broker uplink configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host name or address
    #[serde(default = "default_broker_host")]
    pub host: String,
    /// Broker port
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// TCP connect timeout
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

fn default_broker_host() -> String {
    "127.0.0.1".to_string()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl BrokerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Event-queue depths
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Both recv tasks -> handler
    #[serde(default = "default_queue_depth")]
    pub packet_events: usize,
    /// Handler -> client sender
    #[serde(default = "default_queue_depth")]
    pub client_send: usize,
    /// Handler -> broker sender
    #[serde(default = "default_queue_depth")]
    pub broker_send: usize,
}

fn default_queue_depth() -> usize {
    1024
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            packet_events: default_queue_depth(),
            client_send: default_queue_depth(),
            broker_send: default_queue_depth(),
        }
    }
}

/// A statically declared forwarder
#[derive(Debug, Clone, Deserialize)]
pub struct ForwarderConfig {
    pub name: String,
    pub address: SocketAddrV4,
}

/// A statically declared QoS -1 sender
#[derive(Debug, Clone, Deserialize)]
pub struct QoSm1ClientConfig {
    pub name: String,
    pub address: SocketAddrV4,
}

impl Config {
    /// Load configuration from a TOML file with environment substitution
    /// and `SNGATE_*` overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let content = substitute_env_vars(&content);

        let cfg = config::Config::builder()
            .add_source(File::from_str(&content, FileFormat::Toml))
            .add_source(Environment::with_prefix("SNGATE").separator("__"))
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from environment variables and defaults only
    pub fn from_env() -> Result<Self, ConfigError> {
        let cfg = config::Config::builder()
            .add_source(Environment::with_prefix("SNGATE").separator("__"))
            .build()?;
        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(3..=5).contains(&self.gateway.mqtt_version) {
            return Err(ConfigError::Validation(format!(
                "mqtt_version must be 3, 4 or 5, got {}",
                self.gateway.mqtt_version
            )));
        }
        if self.gateway.client_id_to_user_password
            && (self.gateway.imei_len == 0 || self.gateway.pw_len == 0)
        {
            return Err(ConfigError::Validation(
                "imei_len and pw_len must be non-zero when client_id_to_user_password is set"
                    .to_string(),
            ));
        }
        if self.gateway.max_clients == 0 {
            return Err(ConfigError::Validation(
                "max_clients must be at least 1".to_string(),
            ));
        }
        if self.queues.packet_events == 0
            || self.queues.client_send == 0
            || self.queues.broker_send == 0
        {
            return Err(ConfigError::Validation(
                "queue depths must be at least 1".to_string(),
            ));
        }
        if !self.sensor.multicast_group.ip().is_multicast() {
            return Err(ConfigError::Validation(format!(
                "{} is not a multicast group",
                self.sensor.multicast_group
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for fwd in &self.forwarder {
            if !seen.insert(fwd.address) {
                return Err(ConfigError::Validation(format!(
                    "forwarder address {} declared twice",
                    fwd.address
                )));
            }
        }
        if self.gateway.qos_minus_one && self.qos_minus_one_client.is_empty() {
            return Err(ConfigError::Validation(
                "qos_minus_one is enabled but no qos_minus_one_client entries are declared"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
