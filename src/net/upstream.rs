//! Dialing the statically configured upstream.
//!
//! Every outbound connection, raw TCP or HTTP, goes to the one configured
//! network/address pair. Whatever address the inbound side asked for is
//! ignored.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;

use crate::config::{UpstreamConfig, UpstreamNetwork};
use crate::net::listener::BoxStream;

/// Errors that can occur while dialing upstream.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("failed to connect to {network} upstream {address}: {source}")]
    Connect {
        network: UpstreamNetwork,
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("connecting to upstream {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("{0} upstreams are not supported on this platform")]
    Unsupported(UpstreamNetwork),
}

/// Dials the configured upstream.
#[derive(Debug, Clone)]
pub struct UpstreamDialer {
    network: UpstreamNetwork,
    address: String,
    connect_timeout: Duration,
}

impl UpstreamDialer {
    pub fn new(
        network: UpstreamNetwork,
        address: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            network,
            address: address.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::new(
            config.network,
            config.address.clone(),
            Duration::from_secs(config.connect_timeout_secs),
        )
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Open a new connection to the upstream.
    pub async fn dial(&self) -> Result<BoxStream, DialError> {
        match tokio::time::timeout(self.connect_timeout, self.connect()).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(DialError::Connect {
                network: self.network,
                address: self.address.clone(),
                source,
            }),
            Err(_) => Err(DialError::Timeout {
                address: self.address.clone(),
                timeout: self.connect_timeout,
            }),
        }
    }

    async fn connect(&self) -> io::Result<BoxStream> {
        match self.network {
            UpstreamNetwork::Tcp => {
                let stream = TcpStream::connect(self.address.as_str()).await?;
                stream.set_nodelay(true).ok();
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            UpstreamNetwork::Unix => {
                let stream = tokio::net::UnixStream::connect(&self.address).await?;
                Ok(Box::new(stream))
            }
            #[cfg(not(unix))]
            UpstreamNetwork::Unix => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                DialError::Unsupported(UpstreamNetwork::Unix).to_string(),
            )),
        }
    }
}
