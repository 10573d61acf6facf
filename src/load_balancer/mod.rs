//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request mapped to an lb worker
//!     → session.rs (session ids from ;jsessionid= and JSESSIONID cookies → routes)
//!     → balancer.rs select():
//!         - lazy maintenance (relax members past their recovery window)
//!         - session route → that member (or its redirect)
//!         - otherwise lowest lb_value among usable members, += lb_factor
//!         - otherwise recover the member with the oldest error
//!     → member Worker::get_endpoint → Endpoint::service
//!     → record.rs (mark success, or mark error and try the next member)
//! ```
//!
//! # Design Decisions
//! - Members are `Worker` trait objects, so balancers nest
//! - Record state lives behind one lock per balancer
//! - Unhealthy members are excluded from selection until recovery
//! - Only recoverable failures trigger failover; the attempt count is bounded by group size

pub mod balancer;
pub mod record;
pub mod session;

pub use balancer::{LbWorker, Selection};
pub use record::WorkerRecord;
pub use session::{session_ids, session_route, session_routes};
