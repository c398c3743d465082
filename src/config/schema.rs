//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::listener::ListenerMode;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Overlay node settings (name, state).
    pub node: NodeConfig,

    /// Where connections are forwarded.
    pub upstream: UpstreamConfig,

    /// Inbound listener settings and mode flags.
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Static identity directory for the local overlay.
    pub identities: Vec<IdentityConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ProxyConfig {
    /// Listener mode derived from the exposure and encryption flags.
    pub fn listener_mode(&self) -> ListenerMode {
        ListenerMode::select(self.listener.public_exposure, self.listener.encryption)
    }

    /// Run every semantic check, reporting all failures at once.
    pub fn validate(&self) -> Result<(), crate::config::ConfigError> {
        crate::config::validation::validate_config(self)
    }
}

/// Overlay node configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name in the overlay device list.
    pub hostname: String,

    /// Overlay DNS domain; the canonical name is `hostname.domain` when set.
    pub domain: Option<String>,

    /// Where overlay state is stored. Created with 0700 permissions.
    pub state_dir: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            hostname: "tsproxy".to_string(),
            domain: None,
            state_dir: None,
        }
    }
}

/// Upstream socket family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamNetwork {
    #[default]
    Tcp,
    Unix,
}

impl fmt::Display for UpstreamNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamNetwork::Tcp => f.write_str("tcp"),
            UpstreamNetwork::Unix => f.write_str("unix"),
        }
    }
}

impl std::str::FromStr for UpstreamNetwork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" | "tcp4" | "tcp6" => Ok(UpstreamNetwork::Tcp),
            "unix" => Ok(UpstreamNetwork::Unix),
            other => Err(format!("unknown upstream network: {}", other)),
        }
    }
}

/// Upstream configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Socket family of the upstream.
    pub network: UpstreamNetwork,

    /// Upstream address (`host:port`, or a socket path for unix).
    pub address: String,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            network: UpstreamNetwork::Tcp,
            address: String::new(),
            connect_timeout_secs: 5,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., ":443"). Defaults by mode when HTTP mediation is on.
    pub bind_address: Option<String>,

    /// Listen network type.
    pub network: String,

    /// Expose the service to the public internet.
    pub public_exposure: bool,

    /// Terminate TLS on the listener.
    pub encryption: bool,

    /// Mediate HTTP (identity headers) instead of forwarding raw TCP.
    pub http: bool,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Certificate for encrypted modes of the local overlay.
    pub tls: Option<TlsConfig>,

    /// Whether the local overlay may listen in publicly exposed mode.
    pub allow_public_exposure: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            network: "tcp".to_string(),
            public_exposure: false,
            encryption: false,
            http: false,
            max_connections: 10_000,
            tls: None,
            allow_public_exposure: false,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Idle timeout for forwarded TCP connections in seconds (0 disables).
    pub tcp_idle_secs: u64,

    /// Time allowed to read HTTP request headers.
    pub http_read_header_secs: u64,

    /// Time allowed for a request until the upstream response head is ready
    /// (0 disables).
    pub http_request_secs: u64,

    /// Longest silence tolerated on an HTTP connection (0 disables).
    pub http_idle_secs: u64,
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl TimeoutConfig {
    pub fn tcp_idle(&self) -> Option<Duration> {
        non_zero_secs(self.tcp_idle_secs)
    }

    pub fn http_request(&self) -> Option<Duration> {
        non_zero_secs(self.http_request_secs)
    }

    pub fn http_idle(&self) -> Option<Duration> {
        non_zero_secs(self.http_idle_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            tcp_idle_secs: 60,
            http_read_header_secs: 10,
            http_request_secs: 60,
            http_idle_secs: 120,
        }
    }
}

/// One entry of the static identity directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    /// Peer IP address.
    pub address: String,

    pub login: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub profile_pic_url: String,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = ProxyConfig::default();
        assert_eq!(config.node.hostname, "tsproxy");
        assert_eq!(config.upstream.network, UpstreamNetwork::Tcp);
        assert!(config.upstream.address.is_empty());
        assert_eq!(config.timeouts.tcp_idle(), Some(Duration::from_secs(60)));
        assert_eq!(config.listener_mode(), ListenerMode::Plain);
    }

    #[test]
    fn parses_minimal_toml() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [upstream]
            address = "127.0.0.1:3000"

            [listener]
            http = true
            encryption = true

            [[identities]]
            address = "100.64.0.1"
            login = "alice@example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.upstream.address, "127.0.0.1:3000");
        assert!(config.listener.http);
        assert_eq!(config.listener_mode(), ListenerMode::Encrypted);
        assert_eq!(config.identities.len(), 1);
        assert_eq!(config.identities[0].display_name, "");
        assert_eq!(config.timeouts.http_idle_secs, 120);
    }

    #[test]
    fn unix_network_parses() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [upstream]
            network = "unix"
            address = "/run/app.sock"
            "#,
        )
        .unwrap();
        assert_eq!(config.upstream.network, UpstreamNetwork::Unix);
        assert_eq!("TCP6".parse::<UpstreamNetwork>().unwrap(), UpstreamNetwork::Tcp);
        assert!("udp".parse::<UpstreamNetwork>().is_err());
    }

    #[test]
    fn zero_disables_tcp_idle_timeout() {
        let timeouts = TimeoutConfig {
            tcp_idle_secs: 0,
            ..TimeoutConfig::default()
        };
        assert_eq!(timeouts.tcp_idle(), None);
    }

    #[test]
    fn zero_disables_http_timeouts() {
        let timeouts = TimeoutConfig {
            http_request_secs: 0,
            http_idle_secs: 0,
            ..TimeoutConfig::default()
        };
        assert_eq!(timeouts.http_request(), None);
        assert_eq!(timeouts.http_idle(), None);
        assert_eq!(TimeoutConfig::default().http_idle(), Some(Duration::from_secs(120)));
    }
}
