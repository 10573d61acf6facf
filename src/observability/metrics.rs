//! Metrics collection.
//!
//! # Responsibilities
//! - Define connector metrics (requests, backend errors, failovers, fraud attempts)
//! - Track per-worker counters
//!
//! # Metrics
//! - `ajp_requests_total` (counter): requests by worker, status
//! - `ajp_request_duration_seconds` (histogram): end-to-end service latency
//! - `ajp_worker_errors_total` (counter): failed exchanges by worker, recoverable
//! - `ajp_failovers_total` (counter): balancer retries by balancer
//! - `ajp_fraud_attempts_total` (counter): suffix-spoofing matches by worker
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; with no recorder installed it is a no-op
//! - Exposition is left to the embedding process

use std::time::Instant;

/// Record a completed `service` call.
pub fn record_request(worker: &str, status: u16, start: Instant) {
    metrics::counter!(
        "ajp_requests_total",
        "worker" => worker.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("ajp_request_duration_seconds", "worker" => worker.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Record a failed backend exchange.
pub fn record_worker_error(worker: &str, recoverable: bool) {
    metrics::counter!(
        "ajp_worker_errors_total",
        "worker" => worker.to_string(),
        "recoverable" => recoverable.to_string()
    )
    .increment(1);
}

/// Record a balancer retry onto another member.
pub fn record_failover(balancer: &str) {
    metrics::counter!("ajp_failovers_total", "balancer" => balancer.to_string()).increment(1);
}

/// Record a request caught by the suffix-spoofing guard.
pub fn record_fraud_attempt(worker: &str) {
    metrics::counter!("ajp_fraud_attempts_total", "worker" => worker.to_string()).increment(1);
}
