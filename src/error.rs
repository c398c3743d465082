//! Top-level error type for fatal proxy failures.

use thiserror::Error;

use crate::config::ConfigError;
use crate::net::ListenError;

/// Errors that stop the proxy from starting or keep it from running.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("listener error: {0}")]
    Listen(#[from] ListenError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
