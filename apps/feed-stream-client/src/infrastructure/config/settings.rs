//! Client Configuration Settings
//!
//! Configuration types for the stream client, built in code or loaded from
//! environment variables.

use std::time::Duration;

use crate::domain::streaming::Topic;

/// Stream client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Feed endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Delay before the first reconnect attempt.
    pub reconnect_base_delay: Duration,
    /// Upper bound of the exponential back-off.
    pub reconnect_cap: Duration,
    /// Jitter as a fraction of the computed delay.
    pub reconnect_jitter_ratio: f64,
    /// Consecutive failed attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Heartbeat check interval.
    pub heartbeat_interval: Duration,
    /// Replay-validity window for queued commands.
    pub outbound_queue_ttl: Duration,
    /// Maximum queued commands.
    pub outbound_queue_max_size: usize,
    /// Time allowed for auth plus transport open.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Create a configuration with default settings for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(30),
            reconnect_jitter_ratio: 0.2,
            max_reconnect_attempts: 10,
            heartbeat_interval: Duration::from_secs(30),
            outbound_queue_ttl: Duration::from_secs(30),
            outbound_queue_max_size: 1000,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Set the base reconnect delay.
    #[must_use]
    pub const fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    /// Set the back-off cap.
    #[must_use]
    pub const fn with_reconnect_cap(mut self, cap: Duration) -> Self {
        self.reconnect_cap = cap;
        self
    }

    /// Set the jitter ratio.
    #[must_use]
    pub const fn with_reconnect_jitter_ratio(mut self, ratio: f64) -> Self {
        self.reconnect_jitter_ratio = ratio;
        self
    }

    /// Set the attempt ceiling (0 = unlimited).
    #[must_use]
    pub const fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the replay-validity window.
    #[must_use]
    pub const fn with_outbound_queue_ttl(mut self, ttl: Duration) -> Self {
        self.outbound_queue_ttl = ttl;
        self
    }

    /// Set the queue bound.
    #[must_use]
    pub const fn with_outbound_queue_max_size(mut self, max_size: usize) -> Self {
        self.outbound_queue_max_size = max_size;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `FEED_URL` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from a key lookup.
    ///
    /// Unparseable or out-of-range values fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `FEED_URL` is missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = required(&lookup, "FEED_URL")?;
        let defaults = Self::new(url);

        Ok(Self {
            reconnect_base_delay: parse_duration_millis(
                &lookup,
                "FEED_RECONNECT_BASE_DELAY_MS",
                defaults.reconnect_base_delay,
            ),
            reconnect_cap: parse_duration_millis(
                &lookup,
                "FEED_RECONNECT_CAP_MS",
                defaults.reconnect_cap,
            ),
            reconnect_jitter_ratio: parse::<_, f64>(&lookup, "FEED_RECONNECT_JITTER_RATIO")
                .filter(|r| r.is_finite() && *r >= 0.0)
                .unwrap_or(defaults.reconnect_jitter_ratio),
            max_reconnect_attempts: parse(&lookup, "FEED_MAX_RECONNECT_ATTEMPTS")
                .unwrap_or(defaults.max_reconnect_attempts),
            heartbeat_interval: parse_duration_millis(
                &lookup,
                "FEED_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval,
            ),
            outbound_queue_ttl: parse_duration_millis(
                &lookup,
                "FEED_OUTBOUND_QUEUE_TTL_MS",
                defaults.outbound_queue_ttl,
            ),
            outbound_queue_max_size: parse(&lookup, "FEED_OUTBOUND_QUEUE_MAX_SIZE")
                .unwrap_or(defaults.outbound_queue_max_size),
            connect_timeout: parse_duration_millis(
                &lookup,
                "FEED_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout,
            ),
            ..defaults
        })
    }
}

/// Settings for the bundled binary.
#[derive(Clone)]
pub struct ServiceConfig {
    /// Stream client settings.
    pub client: ClientConfig,
    /// Bearer token for the feed, if any.
    pub auth_token: Option<String>,
    /// Topics to subscribe on start.
    pub topics: Vec<Topic>,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("client", &self.client)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("topics", &self.topics)
            .field("health_port", &self.health_port)
            .finish()
    }
}

impl ServiceConfig {
    /// Default health check port.
    pub const DEFAULT_HEALTH_PORT: u16 = 8083;

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `FEED_URL` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from a key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `FEED_URL` is missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let client = ClientConfig::from_lookup(&lookup)?;

        let auth_token = lookup("FEED_AUTH_TOKEN").filter(|t| !t.trim().is_empty());

        let topics = lookup("FEED_TOPICS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            client,
            auth_token,
            topics,
            health_port: parse(&lookup, "FEED_HEALTH_PORT").unwrap_or(Self::DEFAULT_HEALTH_PORT),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value.trim().to_string())
}

fn parse<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}

/// Zero durations are rejected: none of the timers accepts them.
fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    parse::<F, u64>(lookup, key)
        .filter(|ms| *ms > 0)
        .map_or(default, Duration::from_millis)
}
