//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use sensorlog_db::DbRuntimeSettings;
use sensorlog_events::QueryLimits;
use sensorlog_mqtt::{BrokerSettings, Credentials, IngestSettings, OverflowPolicy};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Event store settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Broker connection settings.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Ingestion consumer settings.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Query API settings.
    #[serde(default)]
    pub query: QueryConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Event store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Table events are written to.
    #[serde(default = "default_table")]
    pub table: String,

    /// SQLite busy timeout, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// How long to wait for a pooled connection, in milliseconds.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

/// Broker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker hostname.
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Username; empty or absent connects anonymously.
    #[serde(default)]
    pub username: Option<String>,

    /// Password used together with `username`.
    #[serde(default)]
    pub password: Option<String>,

    /// Client identifier; generated when absent.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Comma-separated topic filters.
    #[serde(default = "default_topics")]
    pub topics: String,

    /// Keep-alive interval, in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Capacity of the receive-loop → ingestor channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// First reconnect delay, in milliseconds.
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,

    /// Longest reconnect delay, in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

/// Ingestion consumer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Upper bound on one store write, in milliseconds.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Failed events kept for retry; `0` drops on failure.
    #[serde(default = "default_retry_buffer_capacity")]
    pub retry_buffer_capacity: usize,

    /// `drop-oldest` or `drop-newest`.
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Retry cadence while events are pending, in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

/// Query API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Events returned when no valid `limit` is given.
    #[serde(default = "default_query_limit")]
    pub default_limit: usize,

    /// Upper bound on `limit`.
    #[serde(default = "default_query_max_limit")]
    pub max_limit: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "sensorlog_mqtt=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    5000
}

fn default_db_path() -> String {
    "sensorlog.db".to_string()
}

fn default_table() -> String {
    "readings".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_acquire_timeout_ms() -> u64 {
    2_000
}

fn default_mqtt_host() -> String {
    "mosquitto".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_topics() -> String {
    "sensors/mq135/#".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_channel_capacity() -> usize {
    256
}

fn default_backoff_min_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_write_timeout_ms() -> u64 {
    5_000
}

fn default_retry_buffer_capacity() -> usize {
    1_000
}

fn default_retry_interval_ms() -> u64 {
    2_000
}

fn default_query_limit() -> usize {
    sensorlog_events::DEFAULT_LIMIT
}

fn default_query_max_limit() -> usize {
    sensorlog_events::MAX_LIMIT
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            table: default_table(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            client_id: None,
            topics: default_topics(),
            keep_alive_secs: default_keep_alive_secs(),
            channel_capacity: default_channel_capacity(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: default_write_timeout_ms(),
            retry_buffer_capacity: default_retry_buffer_capacity(),
            overflow_policy: OverflowPolicy::default(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_query_limit(),
            max_limit: default_query_max_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl DatabaseConfig {
    /// Pool tunables derived from this section.
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
            acquire_timeout_ms: self.acquire_timeout_ms,
        }
    }
}

impl MqttConfig {
    /// Broker settings derived from this section.
    pub fn broker_settings(&self) -> BrokerSettings {
        let defaults = BrokerSettings::default();
        BrokerSettings {
            host: self.host.clone(),
            port: self.port,
            credentials: Credentials::from_parts(self.username.clone(), self.password.clone()),
            client_id: self
                .client_id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or(defaults.client_id),
            // rumqttc rejects sub-second keep-alives.
            keep_alive: Duration::from_secs(self.keep_alive_secs.max(1)),
            channel_capacity: self.channel_capacity.max(1),
            backoff_min: Duration::from_millis(self.backoff_min_ms.max(1)),
            backoff_max: Duration::from_millis(self.backoff_max_ms.max(self.backoff_min_ms)),
        }
    }
}

impl IngestConfig {
    /// Ingestor settings derived from this section.
    pub fn settings(&self) -> IngestSettings {
        IngestSettings {
            write_timeout: Duration::from_millis(self.write_timeout_ms.max(1)),
            retry_buffer_capacity: self.retry_buffer_capacity,
            overflow_policy: self.overflow_policy,
            retry_interval: Duration::from_millis(self.retry_interval_ms.max(1)),
        }
    }
}

impl QueryConfig {
    /// Query limits derived from this section.
    pub fn limits(&self) -> QueryLimits {
        QueryLimits {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides (see [`apply_env_overrides`]).
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    Ok(apply_env_overrides(config, |key| std::env::var(key).ok()))
}

/// Applies environment overrides using `lookup` to read variables.
///
/// - `SENSORLOG_HOST`, `SENSORLOG_PORT` override `server.*`
/// - `SENSORLOG_DB_PATH`, `SENSORLOG_DB_TABLE` override `database.*`
/// - `SENSORLOG_MQTT_HOST`, `SENSORLOG_MQTT_PORT`, `SENSORLOG_MQTT_USER`,
///   `SENSORLOG_MQTT_PASS`, `SENSORLOG_MQTT_TOPICS` override `mqtt.*`
/// - `SENSORLOG_OVERFLOW_POLICY` overrides `ingest.overflow_policy`
/// - `SENSORLOG_QUERY_DEFAULT_LIMIT`, `SENSORLOG_QUERY_MAX_LIMIT` override `query.*`
/// - `SENSORLOG_LOG_LEVEL`, `SENSORLOG_LOG_JSON` override `logging.*`
///
/// Unparseable numeric values are ignored with a warning.
pub fn apply_env_overrides(mut config: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    fn parsed<T: std::str::FromStr>(key: &str, value: String) -> Option<T> {
        match value.trim().parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                tracing::warn!(key, value = %value, "ignoring unparseable environment override");
                None
            }
        }
    }

    if let Some(host) = lookup("SENSORLOG_HOST").and_then(|v| parsed("SENSORLOG_HOST", v)) {
        config.server.host = host;
    }
    if let Some(port) = lookup("SENSORLOG_PORT").and_then(|v| parsed("SENSORLOG_PORT", v)) {
        config.server.port = port;
    }
    if let Some(path) = lookup("SENSORLOG_DB_PATH") {
        config.database.path = path;
    }
    if let Some(table) = lookup("SENSORLOG_DB_TABLE") {
        config.database.table = table;
    }
    if let Some(host) = lookup("SENSORLOG_MQTT_HOST") {
        config.mqtt.host = host;
    }
    if let Some(port) =
        lookup("SENSORLOG_MQTT_PORT").and_then(|v| parsed("SENSORLOG_MQTT_PORT", v))
    {
        config.mqtt.port = port;
    }
    if let Some(user) = lookup("SENSORLOG_MQTT_USER") {
        config.mqtt.username = Some(user);
    }
    if let Some(pass) = lookup("SENSORLOG_MQTT_PASS") {
        config.mqtt.password = Some(pass);
    }
    if let Some(topics) = lookup("SENSORLOG_MQTT_TOPICS") {
        config.mqtt.topics = topics;
    }
    if let Some(policy) =
        lookup("SENSORLOG_OVERFLOW_POLICY").and_then(|v| parsed("SENSORLOG_OVERFLOW_POLICY", v))
    {
        config.ingest.overflow_policy = policy;
    }
    if let Some(limit) = lookup("SENSORLOG_QUERY_DEFAULT_LIMIT")
        .and_then(|v| parsed("SENSORLOG_QUERY_DEFAULT_LIMIT", v))
    {
        config.query.default_limit = limit;
    }
    if let Some(limit) =
        lookup("SENSORLOG_QUERY_MAX_LIMIT").and_then(|v| parsed("SENSORLOG_QUERY_MAX_LIMIT", v))
    {
        config.query.max_limit = limit;
    }
    if let Some(level) = lookup("SENSORLOG_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("SENSORLOG_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    config
}
