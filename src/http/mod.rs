//! Adapter boundary subsystem.
//!
//! # Data Flow
//! ```text
//! Host web server (adapter)
//!     → request.rs (RequestDescriptor: method, URI, headers, identity, TLS)
//!     → [URI map resolves worker, worker services the request]
//!     → response.rs (AdapterCallbacks: read body, write headers, write body)
//!     → Host web server sends to client
//! ```

pub mod request;
pub mod response;

pub use request::{RequestDescriptor, SslAttributes};
pub use response::{AdapterCallbacks, BufferedExchange};
