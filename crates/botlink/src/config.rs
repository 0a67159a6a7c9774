//! Client configuration.
//!
//! Both [`Endpoint`] and [`ClientConfig`] deserialize with serde so a host
//! application can load them from whatever format it already uses. Duration
//! fields are expressed in milliseconds on the wire.

use std::{fmt, time::Duration};

use serde::Deserialize;
use url::Url;

use crate::error::{BotError, BotResult};

/// Network address of a bot server.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// URL scheme, `ws` or `wss`.
    pub protocol: String,
    pub path: String,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            protocol: "ws".to_string(),
            path: "/".to_string(),
        }
    }
}

impl Endpoint {
    /// Create an endpoint with the default protocol and path.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Render the endpoint as a WebSocket URL.
    pub fn url(&self) -> BotResult<Url> {
        Url::parse(&self.to_string())
            .map_err(|e| BotError::config(format!("Invalid endpoint {self}: {e}")))
    }

    fn validate(&self) -> BotResult<()> {
        if self.host.is_empty() {
            return Err(BotError::config("Endpoint host cannot be empty"));
        }
        if self.port == 0 {
            return Err(BotError::config("Endpoint port must be > 0"));
        }
        if !matches!(self.protocol.as_str(), "ws" | "wss") {
            return Err(BotError::config(format!(
                "Unsupported protocol '{}', expected ws or wss",
                self.protocol
            )));
        }
        self.url().map(|_| ())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slash = if self.path.starts_with('/') { "" } else { "/" };
        write!(
            f,
            "{}://{}:{}{}{}",
            self.protocol, self.host, self.port, slash, self.path
        )
    }
}

/// Fallback address; protocol and path default to the primary's.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FallbackEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl FallbackEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: None,
            path: None,
        }
    }

    /// Fill in the missing parts from the primary endpoint.
    pub fn resolve(&self, primary: &Endpoint) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            protocol: self
                .protocol
                .clone()
                .unwrap_or_else(|| primary.protocol.clone()),
            path: self.path.clone().unwrap_or_else(|| primary.path.clone()),
        }
    }
}

/// Configuration for a [`BotClient`](crate::BotClient).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Endpoint dialed first.
    pub primary: Endpoint,
    /// Endpoint dialed after repeated primary failures.
    pub fallback: Option<FallbackEndpoint>,

    /// Fixed delay before a reconnect attempt.
    #[serde(rename = "reconnect_delay_ms", with = "millis")]
    pub reconnect_delay: Duration,
    /// Default timeout for request-response operations.
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
    /// Timeout for a single dial.
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,
    /// Consecutive primary failures before the fallback is tried.
    pub failover_threshold: u32,

    /// Fetch broadcaster, actions and commands after every connect.
    pub bootstrap: bool,

    /// Capacity of the client event broadcast channel.
    pub event_channel_capacity: usize,
    /// Capacity of the command channel to the connection actor.
    pub command_channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            primary: Endpoint::default(),
            fallback: None,
            reconnect_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            failover_threshold: 2,
            bootstrap: true,
            event_channel_capacity: 256,
            command_channel_capacity: 64,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with the given primary endpoint.
    pub fn new(primary: Endpoint) -> Self {
        Self {
            primary,
            ..Default::default()
        }
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> BotResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the fallback endpoint.
    #[must_use]
    pub fn fallback(mut self, fallback: FallbackEndpoint) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Set the reconnect delay.
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the failover threshold.
    #[must_use]
    pub fn failover_threshold(mut self, threshold: u32) -> Self {
        self.failover_threshold = threshold;
        self
    }

    /// Enable or disable the post-connect bootstrap requests.
    #[must_use]
    pub fn bootstrap(mut self, enabled: bool) -> Self {
        self.bootstrap = enabled;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// The fallback endpoint with inherited protocol and path.
    pub fn fallback_endpoint(&self) -> Option<Endpoint> {
        self.fallback
            .as_ref()
            .map(|fallback| fallback.resolve(&self.primary))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> BotResult<()> {
        self.primary.validate()?;
        if let Some(fallback) = self.fallback_endpoint() {
            fallback.validate()?;
        }
        if self.reconnect_delay.is_zero() {
            return Err(BotError::config("Reconnect delay must be > 0"));
        }
        if self.request_timeout.is_zero() {
            return Err(BotError::config("Request timeout must be > 0"));
        }
        if self.connect_timeout.is_zero() {
            return Err(BotError::config("Connect timeout must be > 0"));
        }
        if self.failover_threshold == 0 {
            return Err(BotError::config("Failover threshold must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(BotError::config("Event channel capacity must be > 0"));
        }
        if self.command_channel_capacity == 0 {
            return Err(BotError::config("Command channel capacity must be > 0"));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
