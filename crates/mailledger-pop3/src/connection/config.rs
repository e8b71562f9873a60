//! Connection configuration types.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Security {
    /// No encryption (port 110). **Not recommended for production.**
    None,
    /// Start with plaintext, upgrade with STLS when advertised (port 110).
    StartTls,
    /// TLS from the start (port 995). **Recommended.**
    #[default]
    Implicit,
}

impl Security {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None | Self::StartTls => 110,
            Self::Implicit => 995,
        }
    }
}

/// POP3 connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Bound on one full request/response cycle. `None` waits forever.
    pub transaction_timeout: Option<Duration>,
    /// Bound on each individual write. `None` waits forever.
    pub send_timeout: Option<Duration>,
    /// Bound on each individual read. `None` waits forever.
    pub receive_timeout: Option<Duration>,
}

impl Config {
    /// Creates a new configuration with implicit TLS on port 995.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        ConfigBuilder::new(host).build()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(host)
    }
}

/// Builder for connection configuration.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    host: String,
    port: Option<u16>,
    security: Security,
    connect_timeout: Duration,
    transaction_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
}

impl ConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            security: Security::Implicit,
            connect_timeout: Duration::from_secs(30),
            transaction_timeout: Some(Duration::from_secs(120)),
            send_timeout: Some(Duration::from_secs(60)),
            receive_timeout: Some(Duration::from_secs(60)),
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the transaction timeout.
    #[must_use]
    pub const fn transaction_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Sets the per-write timeout.
    #[must_use]
    pub const fn send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Sets the per-read timeout.
    #[must_use]
    pub const fn receive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        Config {
            host: self.host,
            port: self.port.unwrap_or_else(|| self.security.default_port()),
            security: self.security,
            connect_timeout: self.connect_timeout,
            transaction_timeout: self.transaction_timeout,
            send_timeout: self.send_timeout,
            receive_timeout: self.receive_timeout,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        assert_eq!(Security::None.default_port(), 110);
        assert_eq!(Security::StartTls.default_port(), 110);
        assert_eq!(Security::Implicit.default_port(), 995);
    }

    #[test]
    fn test_config_new() {
        let config = Config::new("pop.example.com");
        assert_eq!(config.host, "pop.example.com");
        assert_eq!(config.port, 995);
        assert_eq!(config.security, Security::Implicit);
        assert_eq!(config.transaction_timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder("pop.example.com")
            .port(1110)
            .security(Security::StartTls)
            .connect_timeout(Duration::from_secs(10))
            .transaction_timeout(None)
            .receive_timeout(Some(Duration::from_millis(250)))
            .build();

        assert_eq!(config.port, 1110);
        assert_eq!(config.security, Security::StartTls);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.transaction_timeout, None);
        assert_eq!(config.receive_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_config_builder_default_port() {
        let config = Config::builder("pop.example.com")
            .security(Security::None)
            .build();

        assert_eq!(config.port, 110);
    }
}
