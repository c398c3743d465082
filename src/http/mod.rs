//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Overlay connection
//!     → server.rs (hyper connection, Axum router, identity pipeline)
//!     → redirect.rs (canonical host)
//!     → security::headers (forwarding + identity headers)
//!     → forward.rs (upstream HTTP/1.1)
//!     → Send to client
//! ```

pub mod forward;
pub mod redirect;
pub mod server;

pub use forward::{ForwardError, ReverseProxy};
pub use server::HttpProxy;
