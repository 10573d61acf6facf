//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events through the context's dispatcher)
//!     → metrics.rs (counters and histograms through the `metrics` facade)
//!     → tracing.rs (per-request spans with request IDs)
//!
//! Consumers:
//!     → Host process log sink (fmt layer to stderr by default)
//!     → Whatever metrics recorder the embedding process installs
//! ```
//!
//! # Design Decisions
//! - No process-wide logger: the connector context owns its dispatcher
//! - Request ID flows through all subsystems via the service span
//! - Metrics are cheap (atomic increments)
//! - Frame dumps only at trace level

pub mod logging;
pub mod metrics;
pub mod tracing;
