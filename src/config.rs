use http::{HeaderName, HeaderValue};
use std::time::Duration;
use url::Url;

/// Default maximum number of automatic reconnection attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default backoff unit, multiplied by the attempt number
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2000);

/// Configuration for the connection manager
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Reconnection settings
    pub reconnect: ReconnectConfig,
}

impl ManagerConfig {
    /// Create a new builder for configuration
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::default()
    }
}

/// Builder for ManagerConfig
#[derive(Debug, Clone, Default)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    /// Set the whole reconnection configuration
    pub fn reconnect(mut self, config: ReconnectConfig) -> Self {
        self.config.reconnect = config;
        self
    }

    /// Set the maximum number of automatic reconnection attempts
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.config.reconnect.max_attempts = max;
        self
    }

    /// Set the backoff unit
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect.base_delay = delay;
        self
    }

    /// Build the configuration with validation.
    pub fn build(self) -> Result<ManagerConfig, ConfigError> {
        if self.config.reconnect.max_attempts == 0 {
            return Err(ConfigError::InvalidReconnect(
                "max_attempts must be > 0".to_string(),
            ));
        }

        if self.config.reconnect.base_delay.is_zero() {
            return Err(ConfigError::InvalidReconnect(
                "base_delay must be > 0".to_string(),
            ));
        }

        Ok(self.config)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid reconnection configuration
    #[error("Invalid reconnect configuration: {0}")]
    InvalidReconnect(String),
    /// Invalid health configuration
    #[error("Invalid health configuration: {0}")]
    InvalidHealth(String),
    /// Invalid endpoint URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// Invalid transport setting
    #[error("Invalid transport configuration: {0}")]
    InvalidTransport(String),
}

/// Reconnection settings.
///
/// Backoff is linear: the n-th retry waits `n * base_delay`. Growth is only
/// bounded by `max_attempts`.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Consecutive closes without a successful open before giving up
    pub max_attempts: u32,
    /// Backoff unit
    pub base_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl ReconnectConfig {
    /// Calculate the delay for a given attempt number (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Settings for the WebSocket transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Endpoint to connect to (`ws://` or `wss://`)
    pub url: Url,
    /// Timeout for TCP connect, TLS and the WebSocket handshake together
    pub connect_timeout: Duration,
    /// Extra headers sent with the handshake request (e.g. auth)
    pub headers: Vec<(HeaderName, HeaderValue)>,
    /// Capacity of the outbound command buffer per connection
    pub command_buffer: usize,
    /// Keepalive settings
    pub health: HealthConfig,
}

impl TransportConfig {
    /// Create a new builder for the given endpoint
    pub fn builder(url: impl Into<String>) -> TransportConfigBuilder {
        TransportConfigBuilder {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            headers: Vec::new(),
            command_buffer: 100,
            health: HealthConfig::default(),
        }
    }
}

/// Builder for TransportConfig
#[derive(Debug, Clone)]
pub struct TransportConfigBuilder {
    url: String,
    connect_timeout: Duration,
    headers: Vec<(HeaderName, HeaderValue)>,
    command_buffer: usize,
    health: HealthConfig,
}

impl TransportConfigBuilder {
    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Add a handshake header
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }

    /// Set the outbound command buffer capacity
    pub fn command_buffer(mut self, capacity: usize) -> Self {
        self.command_buffer = capacity;
        self
    }

    /// Set health configuration
    pub fn health(mut self, config: HealthConfig) -> Self {
        self.health = config;
        self
    }

    /// Build the configuration with validation.
    pub fn build(self) -> Result<TransportConfig, ConfigError> {
        let url = Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidUrl(format!(
                "unsupported scheme '{}', expected ws or wss",
                url.scheme()
            )));
        }

        if url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl("no host in URL".to_string()));
        }

        if self.command_buffer == 0 {
            return Err(ConfigError::InvalidTransport(
                "command_buffer cannot be 0".to_string(),
            ));
        }

        if self.health.pong_timeout > self.health.ping_interval {
            return Err(ConfigError::InvalidHealth(
                "pong_timeout should be <= ping_interval".to_string(),
            ));
        }

        if self.health.failure_threshold == 0 {
            return Err(ConfigError::InvalidHealth(
                "failure_threshold must be > 0".to_string(),
            ));
        }

        Ok(TransportConfig {
            url,
            connect_timeout: self.connect_timeout,
            headers: self.headers,
            command_buffer: self.command_buffer,
            health: self.health,
        })
    }
}

/// Keepalive configuration
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Interval for sending WebSocket pings
    pub ping_interval: Duration,
    /// Timeout for receiving a pong response
    pub pong_timeout: Duration,
    /// Number of consecutive pong timeouts before closing the connection
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(10),
            failure_threshold: 3,
        }
    }
}
