//! Overlay network capabilities.
//!
//! # Data Flow
//! ```text
//! ProxyCore
//!     → OverlayListenerProvider (listen in plain/encrypted/public mode)
//!     → inbound connection (peer address)
//!     → IdentityProvider::who_is(peer) → CallerIdentity
//!     → HTTP header injection
//! ```
//!
//! # Design Decisions
//! - The proxy depends only on these traits; membership, key state and
//!   routing live behind them
//! - Identity is resolved per request and never cached
//! - `local.rs` and `identity.rs` provide a self-contained implementation for
//!   development and tests

pub mod identity;
pub mod local;

use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;

use crate::net::listener::{BoxListener, ListenError};

pub use identity::StaticIdentityProvider;
pub use local::LocalOverlay;

/// The resolved identity behind an inbound connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub login_name: String,
    pub display_name: String,
    pub profile_pic_url: String,
}

/// Errors from identity resolution.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No overlay member is known at this address.
    #[error("no identity known for peer {0}")]
    UnknownPeer(SocketAddr),
}

/// Resolves the caller behind a remote address.
///
/// Implementations are shared across all connection tasks.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn who_is(&self, remote: SocketAddr) -> Result<CallerIdentity, IdentityError>;
}

/// Mode-specific listen operations offered by the overlay node.
#[async_trait]
pub trait OverlayListenerProvider: Send + Sync {
    /// Listen for overlay members without transport encryption.
    async fn listen_plain(&self, network: &str, address: &str) -> Result<BoxListener, ListenError>;

    /// Listen for overlay members over TLS.
    async fn listen_encrypted(
        &self,
        network: &str,
        address: &str,
    ) -> Result<BoxListener, ListenError>;

    /// Listen for connections from the public internet.
    async fn listen_publicly_exposed(
        &self,
        network: &str,
        address: &str,
    ) -> Result<BoxListener, ListenError>;

    /// Names the node answers to; the first entry is canonical.
    fn canonical_hostnames(&self) -> Vec<String>;
}
