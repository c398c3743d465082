//! Listener abstraction and listener-mode selection.
//!
//! # Responsibilities
//! - Derive the listener mode from configuration flags
//! - Resolve the bind address, applying the conventional default ports
//! - Obtain a listener for the mode from the overlay provider
//! - Enforce max_connections on accepted connections via semaphore
//!
//! # Design Decisions
//! - Mode priority is fixed: PubliclyExposed > Encrypted > Plain
//! - Listener acquisition failures are fatal for the caller; accept
//!   failures are logged, backed off and never end the accept loop

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Semaphore;

use crate::config::validation::ConfigError;
use crate::overlay::OverlayListenerProvider;

/// Conventional port for encrypted HTTP.
pub const DEFAULT_ENCRYPTED_PORT: u16 = 443;

/// Conventional port for plain HTTP.
pub const DEFAULT_PLAIN_PORT: u16 = 80;

/// Pause after a failed accept, e.g. when out of file descriptors.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// A duplex byte stream, inbound or outbound.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Type-erased duplex stream.
pub type BoxStream = Box<dyn AsyncStream>;

/// A source of inbound connections.
#[async_trait]
pub trait OverlayListener: Send + Sync {
    /// Wait for the next inbound connection.
    async fn accept(&self) -> io::Result<(BoxStream, SocketAddr)>;

    /// Address this listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Whether accepted streams are already TLS-terminated.
    fn is_encrypted(&self) -> bool;
}

/// Type-erased listener.
pub type BoxListener = Box<dyn OverlayListener>;

/// Error type for listener acquisition.
#[derive(Debug, Error)]
pub enum ListenError {
    /// Failed to bind to address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The overlay refused the mode (e.g. public exposure without a grant).
    #[error("listener mode {0} is not permitted for this node")]
    NotPermitted(ListenerMode),

    /// Listening on the requested network type is not possible.
    #[error("unsupported listen network: {0}")]
    UnsupportedNetwork(String),

    /// Transport-encryption material could not be loaded.
    #[error("TLS setup failed: {0}")]
    Tls(String),
}

/// How the inbound listener is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerMode {
    /// Reachable by overlay members, no transport encryption.
    Plain,
    /// Reachable by overlay members over TLS.
    Encrypted,
    /// Reachable from the public internet (implies TLS).
    PubliclyExposed,
}

impl ListenerMode {
    /// Pick the mode from configuration flags.
    ///
    /// Public exposure wins regardless of the encryption flag.
    pub fn select(public_exposure: bool, encryption: bool) -> Self {
        if public_exposure {
            ListenerMode::PubliclyExposed
        } else if encryption {
            ListenerMode::Encrypted
        } else {
            ListenerMode::Plain
        }
    }

    /// Whether streams accepted in this mode are TLS-protected.
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, ListenerMode::Plain)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerMode::Plain => "plain",
            ListenerMode::Encrypted => "encrypted",
            ListenerMode::PubliclyExposed => "publicly_exposed",
        }
    }
}

impl fmt::Display for ListenerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve the bind address for a mode.
///
/// An explicit address always wins. Without one, HTTP mediation defaults to
/// `:443` for encrypted modes and `:80` otherwise; raw TCP mode has no
/// default and fails.
pub fn resolve_bind_address(
    bind_address: Option<&str>,
    http: bool,
    mode: ListenerMode,
) -> Result<String, ConfigError> {
    match bind_address.map(str::trim).filter(|a| !a.is_empty()) {
        Some(addr) => Ok(addr.to_string()),
        None if http => {
            let port = if mode.is_encrypted() {
                DEFAULT_ENCRYPTED_PORT
            } else {
                DEFAULT_PLAIN_PORT
            };
            Ok(format!(":{}", port))
        }
        None => Err(ConfigError::MissingBindAddress),
    }
}

/// Expand a bare `:port` into an all-interfaces socket address string.
pub fn normalize_bind_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    }
}

/// Chooses and obtains the inbound listener.
#[derive(Clone)]
pub struct ListenerStrategy {
    provider: Arc<dyn OverlayListenerProvider>,
}

impl ListenerStrategy {
    pub fn new(provider: Arc<dyn OverlayListenerProvider>) -> Self {
        Self { provider }
    }

    /// Obtain a listener for `mode` bound to `address`.
    pub async fn obtain(
        &self,
        mode: ListenerMode,
        network: &str,
        address: &str,
    ) -> Result<BoxListener, ListenError> {
        let listener = match mode {
            ListenerMode::Plain => self.provider.listen_plain(network, address).await?,
            ListenerMode::Encrypted => self.provider.listen_encrypted(network, address).await?,
            ListenerMode::PubliclyExposed => {
                self.provider.listen_publicly_exposed(network, address).await?
            }
        };

        if let Ok(local) = listener.local_addr() {
            tracing::info!(mode = %mode, address = %local, "Listener bound");
        }
        Ok(listener)
    }
}

/// A listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
pub struct Listener {
    inner: BoxListener,
    connection_limit: Arc<Semaphore>,
}

impl Listener {
    pub fn new(inner: BoxListener, max_connections: usize) -> Self {
        Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> io::Result<(BoxStream, SocketAddr, ConnectionPermit)> {
        // Acquire permit first (backpressure)
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| io::Error::other("connection limit semaphore closed"))?;

        let (stream, addr) = self.inner.accept().await?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn is_encrypted(&self) -> bool {
        self.inner.is_encrypted()
    }
}

/// Accept errors that concern a single connection, not the listener.
pub fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Log a failed accept and pause before the next attempt.
///
/// The listener stays open either way. Anything other than a transient
/// per-connection error (e.g. EMFILE) gets `ACCEPT_RETRY_DELAY` to let the
/// shortage clear instead of spinning.
pub async fn accept_backoff(err: &io::Error) {
    if is_transient_accept_error(err) {
        tracing::debug!(error = %err, "Transient accept error");
        return;
    }
    tracing::warn!(error = %err, "Accept failed, retrying");
    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
