//! Raw TCP forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! Listener::accept
//!     → server.rs (per-connection task)
//!     → UpstreamDialer::dial (static upstream)
//!     → ConnectionForwarder (both directions, idle deadline, single teardown)
//! ```

pub mod server;

pub use server::TcpProxy;
