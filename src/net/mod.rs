//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Overlay listener (plain / TLS / public)
//!     → listener.rs (mode selection, connection limits)
//!     → connection.rs (IDs, active-connection tracking)
//!     → upstream.rs (dial the one configured upstream)
//!     → forward.rs (copy both directions through buffer_pool.rs buffers,
//!                   idle.rs deadlines, single teardown)
//! ```
//!
//! # Design Decisions
//! - Streams are type-erased (`BoxStream`) so TLS, TCP and Unix sockets share
//!   one forwarding path
//! - Forwarding failures are connection-scoped and never reach the accept loop

pub mod buffer_pool;
pub mod connection;
pub mod forward;
pub mod idle;
pub mod listener;
pub mod tls;
pub mod upstream;

pub use buffer_pool::BufferPool;
pub use forward::ConnectionForwarder;
pub use listener::{BoxListener, BoxStream, ListenError, ListenerMode, ListenerStrategy};
pub use upstream::{DialError, UpstreamDialer};
