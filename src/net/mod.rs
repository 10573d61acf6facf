//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Worker host/port (validated at startup)
//!     → connection.rs resolve() → SocketAddr
//!     → connection.rs connect() (EINTR retry, no-delay, keep-alive, timeouts)
//!     → Connection::send_all / recv_all (full-buffer, blocking)
//!     → NetError classified recoverable / unrecoverable
//! ```
//!
//! # Design Decisions
//! - No async path: every call blocks the request's thread
//! - Recoverability is decided here and carried upward unchanged
//! - Timeouts surface as recoverable errors so balancers can fail over

pub mod connection;

pub use connection::{Connection, ConnectionId, NetError, NetOp, SocketOptions};
