//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Request with a resolved caller identity:
//!     → headers.rs (replace X-Forwarded-*)
//!     → headers.rs (strip identity headers in every spelling, inject real ones)
//!     → headers.rs (strip hop-by-hop)
//!     → Pass to upstream
//! ```
//!
//! # Design Decisions
//! - No trust in client input: identity and forwarding headers are always
//!   overwritten, never merged
//! - Fail closed: a request whose caller cannot be identified is never forwarded

pub mod headers;
