//! Where and how to reach the SMTP server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Which certificates the TLS layer trusts.
#[derive(Debug, Clone, Default)]
pub enum TlsConfig {
    /// Bundled Mozilla root certificates.
    #[default]
    Default,
    /// Only the certificates in this PEM file.
    CustomRoot(PathBuf),
    /// A fully configured rustls client.
    Custom(Arc<rustls::ClientConfig>),
}

/// How the channel to the server is protected.
#[derive(Debug, Clone)]
pub enum Security {
    /// Plaintext for the whole session. Credentials travel in the clear.
    Insecure,
    /// Start with plaintext, upgrade with STARTTLS when the server offers it (port 587).
    StartTls(TlsConfig),
    /// TLS from the start (port 465).
    Tls(TlsConfig),
}

impl Default for Security {
    fn default() -> Self {
        Self::StartTls(TlsConfig::Default)
    }
}

impl Security {
    /// Submission port conventionally paired with the mode.
    #[must_use]
    pub const fn default_port(&self) -> u16 {
        match self {
            Self::Insecure | Self::StartTls(_) => 587,
            Self::Tls(_) => 465,
        }
    }
}

/// Everything needed to open a [`Client`](super::Client) session.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server name, also checked against its certificate.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Transport protection.
    pub security: Security,
    /// Name sent with EHLO/HELO. Defaults to `host`.
    pub hello_name: Option<String>,
    /// Upper bound for TCP connect, greeting, handshake and STARTTLS together.
    pub connect_timeout: Duration,
}

impl Config {
    /// STARTTLS on port 587 with the bundled roots.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        ConfigBuilder::new(host).build()
    }

    /// Starts a builder for `host`.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(host)
    }

    /// Name announced in EHLO/HELO.
    #[must_use]
    pub fn hello_name(&self) -> &str {
        self.hello_name.as_deref().unwrap_or(&self.host)
    }
}

/// Step-by-step construction of a [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    host: String,
    port: Option<u16>,
    security: Security,
    hello_name: Option<String>,
    connect_timeout: Duration,
}

impl ConfigBuilder {
    /// Builder with default security and a 30 second timeout.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            security: Security::default(),
            hello_name: None,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Overrides the port implied by the security mode.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Chooses plaintext, STARTTLS or implicit TLS.
    #[must_use]
    pub fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the name announced in EHLO/HELO.
    #[must_use]
    pub fn hello_name(mut self, name: impl Into<String>) -> Self {
        self.hello_name = Some(name.into());
        self
    }

    /// Bounds the whole connect phase.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Finishes the configuration, filling in the port if unset.
    #[must_use]
    pub fn build(self) -> Config {
        Config {
            port: self.port.unwrap_or_else(|| self.security.default_port()),
            host: self.host,
            security: self.security,
            hello_name: self.hello_name,
            connect_timeout: self.connect_timeout,
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
        assert_eq!(Security::Insecure.default_port(), 587);
        assert_eq!(Security::StartTls(TlsConfig::Default).default_port(), 587);
        assert_eq!(Security::Tls(TlsConfig::Default).default_port(), 465);
    }

    #[test]
    fn test_submission_defaults() {
        let config = Config::new("relay.test");
        assert_eq!(config.host, "relay.test");
        assert_eq!(config.port, 587);
        assert!(matches!(config.security, Security::StartTls(TlsConfig::Default)));
        assert_eq!(config.hello_name(), "relay.test");
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_overrides() {
        let config = Config::builder("relay.test")
            .security(Security::Insecure)
            .port(2525)
            .hello_name("worker-7.internal")
            .connect_timeout(Duration::from_millis(1500))
            .build();

        assert_eq!(config.port, 2525);
        assert!(matches!(config.security, Security::Insecure));
        assert_eq!(config.hello_name(), "worker-7.internal");
        assert_eq!(config.connect_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_implicit_tls_picks_465() {
        let config = Config::builder("relay.test")
            .security(Security::Tls(TlsConfig::CustomRoot("/etc/ca.pem".into())))
            .build();

        assert_eq!(config.port, 465);
    }
}
