//! Identity-aware overlay proxy library.
//!
//! Exposes one local service on an overlay network node, either as raw TCP
//! forwarding or as an HTTP reverse proxy that stamps every request with the
//! caller's verified identity.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod overlay;
pub mod security;
pub mod tcp;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpProxy;
pub use lifecycle::{ProxyCore, Shutdown};
pub use tcp::TcpProxy;
