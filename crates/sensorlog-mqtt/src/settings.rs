//! Broker connection settings.

use std::time::Duration;

/// Username/password pair for brokers that require authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Broker username.
    pub username: String,
    /// Broker password.
    pub password: String,
}

impl Credentials {
    /// Returns credentials only when a username is present; an empty
    /// username means the connection is anonymous.
    pub fn from_parts(username: Option<String>, password: Option<String>) -> Option<Self> {
        match username {
            Some(username) if !username.is_empty() => Some(Self {
                username,
                password: password.unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the subscription manager needs to reach the broker.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Broker hostname or IP address.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// Optional credentials; `None` connects anonymously.
    pub credentials: Option<Credentials>,
    /// MQTT client identifier.
    pub client_id: String,
    /// Keep-alive interval negotiated with the broker.
    pub keep_alive: Duration,
    /// Capacity of the channel between the receive loop and the ingestor.
    pub channel_capacity: usize,
    /// First reconnect delay.
    pub backoff_min: Duration,
    /// Longest reconnect delay.
    pub backoff_max: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            credentials: None,
            client_id: generate_client_id(),
            keep_alive: Duration::from_secs(60),
            channel_capacity: 256,
            backoff_min: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// Builds a short random client id; some brokers cap ids at 23 bytes.
pub fn generate_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("sensorlog-{}", &id[..12])
}
