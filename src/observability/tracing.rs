//! Request spans.
//!
//! Every `service` call runs inside a span carrying the request ID, so
//! events from the URI map, the balancer and the endpoint correlate.

use tracing::Span;
use uuid::Uuid;

/// Span covering one request from worker resolution to the last body byte.
pub fn request_span(request_id: Uuid, method: &str, uri: &str) -> Span {
    tracing::info_span!("service", request_id = %request_id, method = %method, uri = %uri)
}
