//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → State dir → Obtain listener → Start TCP/HTTP proxy
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Accept loops exit → Listener dropped → run() returns
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then listener, then traffic
//! - One process-wide shutdown signal; every fatal path goes through it
//! - Accept loops race the shutdown signal, so a blocked accept never delays exit

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use startup::{ProxyCore, RunningProxy};
