//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges and required settings
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), ConfigError>
//! - Runs before config is accepted into the system

use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("upstream address must not be empty")]
    MissingUpstream,

    #[error("unsupported listen network: {0}")]
    UnsupportedListenNetwork(String),

    #[error("listener.max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("timeouts.http_idle_secs ({idle}) must be at least timeouts.http_request_secs ({request})")]
    IdleShorterThanRequest { idle: u64, request: u64 },

    #[error("timeouts.http_read_header_secs must be greater than zero")]
    ZeroReadHeaderTimeout,

    #[error("identity address is not an IP: {0}")]
    BadIdentityAddress(String),
}

/// Error type for configuration problems. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("no bind address given and no default applies in TCP mode")]
    MissingBindAddress,

    #[error("identity address is not an IP: {0}")]
    InvalidIdentityAddress(String),

    #[error("failed to prepare state directory {path}: {source}")]
    StateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Check a configuration for semantic errors, collecting all of them.
pub fn validate_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.upstream.address.trim().is_empty() {
        errors.push(ValidationError::MissingUpstream);
    }

    if !matches!(config.listener.network.as_str(), "tcp" | "tcp4" | "tcp6") {
        errors.push(ValidationError::UnsupportedListenNetwork(
            config.listener.network.clone(),
        ));
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }

    let timeouts = &config.timeouts;
    if timeouts.http_read_header_secs == 0 {
        errors.push(ValidationError::ZeroReadHeaderTimeout);
    }
    if let (Some(idle), Some(request)) = (timeouts.http_idle(), timeouts.http_request()) {
        if idle < request {
            errors.push(ValidationError::IdleShorterThanRequest {
                idle: idle.as_secs(),
                request: request.as_secs(),
            });
        }
    }

    for identity in &config.identities {
        if identity.address.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::BadIdentityAddress(identity.address.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::IdentityConfig;

    fn valid() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.upstream.address = "127.0.0.1:8080".into();
        config
    }

    fn errors_of(config: &ProxyConfig) -> Vec<ValidationError> {
        match validate_config(config) {
            Err(ConfigError::Validation(errors)) => errors,
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn empty_upstream_is_rejected() {
        let mut config = valid();
        config.upstream.address = "   ".into();
        assert_eq!(errors_of(&config), vec![ValidationError::MissingUpstream]);
    }

    #[test]
    fn all_errors_are_reported() {
        let mut config = ProxyConfig::default();
        config.listener.max_connections = 0;
        config.listener.network = "udp".into();
        config.timeouts.http_idle_secs = 5;
        config.identities.push(IdentityConfig {
            address: "bogus".into(),
            login: "x".into(),
            display_name: String::new(),
            profile_pic_url: String::new(),
        });

        let errors = errors_of(&config);
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::MissingUpstream));
        assert!(errors.contains(&ValidationError::ZeroMaxConnections));
        assert!(errors.contains(&ValidationError::BadIdentityAddress("bogus".into())));
    }

    #[test]
    fn zero_http_timeouts_mean_disabled() {
        let mut config = valid();
        config.timeouts.http_idle_secs = 0;
        config.timeouts.http_request_secs = 0;
        assert!(validate_config(&config).is_ok());

        config.timeouts.http_idle_secs = 0;
        config.timeouts.http_request_secs = 300;
        assert!(validate_config(&config).is_ok());

        config.timeouts.http_idle_secs = 30;
        assert_eq!(
            errors_of(&config),
            vec![ValidationError::IdleShorterThanRequest { idle: 30, request: 300 }]
        );
    }

    #[test]
    fn display_joins_errors() {
        let err = ConfigError::Validation(vec![
            ValidationError::MissingUpstream,
            ValidationError::ZeroMaxConnections,
        ]);
        assert_eq!(
            err.to_string(),
            "validation failed: upstream address must not be empty, listener.max_connections must be greater than zero"
        );
    }
}
