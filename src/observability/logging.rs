//! Structured logging.
//!
//! # Responsibilities
//! - Build the log dispatcher owned by a connector context
//! - Configure the level from configuration, overridable by `RUST_LOG`
//!
//! # Design Decisions
//! - Uses the tracing crate for structured logging
//! - The dispatcher is returned, not installed globally; callers scope it
//! - Audit events use the dedicated `ajp_connector::audit` target

use tracing::Dispatch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Target of security audit events.
pub const AUDIT_TARGET: &str = "ajp_connector::audit";

/// Build a dispatcher logging at `level` (an `EnvFilter` directive).
///
/// `RUST_LOG` takes precedence when set. An unparsable `level` falls back to `info`.
pub fn build_dispatch(level: &str) -> Dispatch {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        );

    Dispatch::new(subscriber)
}

/// A dispatcher that drops every event.
pub fn silent_dispatch() -> Dispatch {
    Dispatch::none()
}
