//! Worker subsystem.
//!
//! # Data Flow
//! ```text
//! Worker name (from the URI map)
//!     → registry.rs (look up the worker object)
//!     → Worker::get_endpoint (cached or fresh endpoint)
//!     → Endpoint::service:
//!         - ajp13.rs (one AJP exchange over a pooled or new connection)
//!         - load_balancer (pick a member, retry others on recoverable failure)
//!         - status.rs (JSON snapshot of the registry)
//!     → Endpoint::done (return connection to cache.rs or close it)
//! ```
//!
//! # Design Decisions
//! - Every worker kind shares one trait, so a balancer can hold balancers
//! - Lifecycle: Unvalidated → Validated → Initialized → Destroyed, enforced per worker
//! - Endpoints borrow their worker and are owned by one request at a time
//! - Recoverability is decided where the failure happens and carried unchanged upward

pub mod ajp13;
pub mod cache;
pub mod registry;
pub mod status;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Weak;

use serde::Serialize;
use thiserror::Error;

use crate::config::{ConfigError, Properties, WorkerType};
use crate::http::{AdapterCallbacks, RequestDescriptor};
use crate::net::NetError;
use crate::protocol::codes::{max_send_body, DEF_BUFFER_SZ};
use crate::protocol::ProtocolError;

pub use ajp13::Ajp13Worker;
pub use cache::EndpointCache;
pub use registry::{create_worker, WorkerRegistry};
pub use status::{StatusWorker, WorkerStatus};

/// Largest request body chunk kept for replay on failover.
pub const REPLAY_CHUNK_SZ: usize = max_send_body(DEF_BUFFER_SZ);

/// A logical backend target.
pub trait Worker: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn kind(&self) -> WorkerType;

    fn state(&self) -> WorkerState;

    /// Parse and check this worker's configuration. Opens no sockets.
    fn validate(&mut self, props: &Properties) -> Result<(), ConfigError>;

    /// One-time setup after a successful `validate`.
    fn init(&mut self, props: &Properties) -> Result<(), ConfigError>;

    /// A request-scoped endpoint, reused from a cache when possible.
    fn get_endpoint(&self) -> Result<Box<dyn Endpoint + '_>, ServiceError>;

    /// Release every resource. No other call is valid afterwards.
    fn destroy(&self);

    fn status(&self) -> WorkerStatus;

    /// Check that `refresh` would accept `props`, without applying anything.
    fn check_refresh(&self, _props: &Properties) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Re-read runtime settings after a configuration change.
    ///
    /// Callers run `check_refresh` first; once it passes, `refresh` applies
    /// the whole change.
    fn refresh(&self, _props: &Properties) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Give the worker a handle on the registry that owns it.
    fn attach_registry(&self, _registry: Weak<WorkerRegistry>) {}
}

/// A worker bound to one request.
pub trait Endpoint {
    /// Run one request/response exchange; returns the response status.
    fn service(&mut self, req: &mut ServiceRequest<'_>) -> Result<u16, ServiceError>;

    /// Hand the endpoint back. Dropping it has the same effect.
    fn done(self: Box<Self>) {}
}

/// Lifecycle state of a worker.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Unvalidated = 0,
    Validated = 1,
    Initialized = 2,
    Destroyed = 3,
}

impl From<u8> for WorkerState {
    fn from(val: u8) -> Self {
        match val {
            1 => WorkerState::Validated,
            2 => WorkerState::Initialized,
            3 => WorkerState::Destroyed,
            _ => WorkerState::Unvalidated,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Unvalidated => "unvalidated",
            WorkerState::Validated => "validated",
            WorkerState::Initialized => "initialized",
            WorkerState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Atomic holder for a `WorkerState`.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(WorkerState::Unvalidated as u8))
    }

    pub fn get(&self) -> WorkerState {
        WorkerState::from(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to`; fails if the worker is in any other state.
    pub fn transition(&self, worker: &str, from: WorkerState, to: WorkerState) -> Result<(), ConfigError> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|found| ConfigError::Lifecycle {
                worker: worker.to_string(),
                expected: from.to_string(),
                found: WorkerState::from(found).to_string(),
            })
    }

    /// Ok only while the worker can hand out endpoints.
    pub fn ensure_ready(&self, worker: &str) -> Result<(), ServiceError> {
        match self.get() {
            WorkerState::Initialized => Ok(()),
            WorkerState::Destroyed => Err(ServiceError::Destroyed {
                worker: worker.to_string(),
            }),
            WorkerState::Unvalidated | WorkerState::Validated => Err(ServiceError::NoEndpoint {
                worker: worker.to_string(),
            }),
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Failure of a `service` call.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("worker {worker}: {source}")]
    Transport {
        worker: String,
        #[source]
        source: NetError,
        recoverable: bool,
    },

    #[error("worker {worker}: protocol error: {source}")]
    Protocol {
        worker: String,
        #[source]
        source: ProtocolError,
    },

    #[error("client connection failed: {0}")]
    Client(#[source] io::Error),

    #[error("worker {worker} has no endpoint available (not initialized)")]
    NoEndpoint { worker: String },

    #[error("no usable member in {worker}")]
    Unavailable { worker: String },

    #[error("unknown worker {0}")]
    UnknownWorker(String),

    #[error("worker {worker} has been destroyed")]
    Destroyed { worker: String },

    #[error("no worker mapped for {uri}")]
    Unmapped { uri: String },
}

impl ServiceError {
    /// Whether a balancer may try another member.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ServiceError::Transport { recoverable, .. } => *recoverable,
            ServiceError::NoEndpoint { .. }
            | ServiceError::Unavailable { .. }
            | ServiceError::Destroyed { .. } => true,
            ServiceError::Protocol { .. }
            | ServiceError::Client(_)
            | ServiceError::UnknownWorker(_)
            | ServiceError::Unmapped { .. } => false,
        }
    }

    /// The failure was on the client side of the exchange.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ServiceError::Client(_))
    }

    /// Status reported to the adapter.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Unmapped { .. } => 404,
            ServiceError::Client(_) => 400,
            _ => 500,
        }
    }
}

/// Per-request state shared by every attempt of one `service` call.
///
/// The first body chunk is read from the adapter once and replayed on each
/// attempt. Once the response has started or a backend has pulled further
/// body chunks, a failed attempt can no longer be retried.
pub struct ServiceRequest<'a> {
    pub descriptor: &'a RequestDescriptor,
    callbacks: &'a mut dyn AdapterCallbacks,
    /// Session route of the member chosen by a balancer.
    pub route: Option<String>,
    first_chunk: Option<Vec<u8>>,
    body_remaining: u64,
    response_started: bool,
    body_streamed: bool,
}

impl<'a> ServiceRequest<'a> {
    pub fn new(descriptor: &'a RequestDescriptor, callbacks: &'a mut dyn AdapterCallbacks) -> Self {
        Self {
            descriptor,
            callbacks,
            route: None,
            first_chunk: None,
            body_remaining: descriptor.content_length().unwrap_or(0),
            response_started: false,
            body_streamed: false,
        }
    }

    /// The replayable first body chunk, read from the adapter on first use.
    pub fn first_body_chunk(&mut self) -> Result<&[u8], ServiceError> {
        if self.first_chunk.is_none() {
            let want = usize::try_from(self.body_remaining)
                .unwrap_or(usize::MAX)
                .min(REPLAY_CHUNK_SZ);
            let mut chunk = vec![0u8; want];
            let n = self.fill(&mut chunk)?;
            chunk.truncate(n);
            self.first_chunk = Some(chunk);
        }
        Ok(self.first_chunk.as_deref().unwrap_or_default())
    }

    /// Read the next body chunk for a backend that asked for more.
    pub fn read_body_chunk(&mut self, buf: &mut [u8]) -> Result<usize, ServiceError> {
        self.body_streamed = true;
        let want = usize::try_from(self.body_remaining)
            .unwrap_or(usize::MAX)
            .min(buf.len());
        self.fill(&mut buf[..want])
    }

    pub fn write_headers(
        &mut self,
        status: u16,
        reason: &str,
        headers: &[(String, String)],
    ) -> Result<(), ServiceError> {
        self.response_started = true;
        self.callbacks
            .write_headers(status, reason, headers)
            .map_err(ServiceError::Client)
    }

    pub fn write_body(&mut self, data: &[u8]) -> Result<(), ServiceError> {
        self.response_started = true;
        self.callbacks.write_body(data).map_err(ServiceError::Client)
    }

    /// Response bytes have already reached the adapter.
    pub fn response_started(&self) -> bool {
        self.response_started
    }

    /// Body beyond the replayable chunk has been consumed.
    pub fn body_streamed(&self) -> bool {
        self.body_streamed
    }

    /// Body bytes the adapter has not handed over yet.
    pub fn body_remaining(&self) -> u64 {
        self.body_remaining
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, ServiceError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .callbacks
                .read_body(&mut buf[filled..])
                .map_err(ServiceError::Client)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.body_remaining = self.body_remaining.saturating_sub(filled as u64);
        Ok(filled)
    }
}

impl fmt::Debug for ServiceRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRequest")
            .field("request_id", &self.descriptor.request_id)
            .field("uri", &self.descriptor.uri)
            .field("route", &self.route)
            .field("body_remaining", &self.body_remaining)
            .field("response_started", &self.response_started)
            .field("body_streamed", &self.body_streamed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::BufferedExchange;

    #[test]
    fn test_state_transitions() {
        let state = StateCell::new();
        assert_eq!(state.get(), WorkerState::Unvalidated);
        assert!(state.ensure_ready("w").is_err());

        state.transition("w", WorkerState::Unvalidated, WorkerState::Validated).unwrap();
        let err = state
            .transition("w", WorkerState::Unvalidated, WorkerState::Validated)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Lifecycle { .. }));

        state.transition("w", WorkerState::Validated, WorkerState::Initialized).unwrap();
        assert!(state.ensure_ready("w").is_ok());

        state.set(WorkerState::Destroyed);
        assert!(matches!(state.ensure_ready("w"), Err(ServiceError::Destroyed { .. })));
    }

    #[test]
    fn test_first_chunk_is_read_once() {
        let descriptor = RequestDescriptor::new("POST", "/app/upload").with_header("Content-Length", "5");
        let mut exchange = BufferedExchange::new(b"hello".to_vec());
        let mut req = ServiceRequest::new(&descriptor, &mut exchange);

        assert_eq!(req.first_body_chunk().unwrap(), b"hello");
        assert_eq!(req.first_body_chunk().unwrap(), b"hello");
        assert_eq!(req.body_remaining(), 0);
        assert!(!req.body_streamed());
        drop(req);
        assert_eq!(exchange.body_consumed(), 5);
    }

    #[test]
    fn test_large_body_is_streamed_after_first_chunk() {
        let body = vec![7u8; REPLAY_CHUNK_SZ + 100];
        let descriptor = RequestDescriptor::new("POST", "/app/upload")
            .with_header("Content-Length", body.len().to_string());
        let mut exchange = BufferedExchange::new(body);
        let mut req = ServiceRequest::new(&descriptor, &mut exchange);

        assert_eq!(req.first_body_chunk().unwrap().len(), REPLAY_CHUNK_SZ);
        let mut buf = [0u8; 512];
        assert_eq!(req.read_body_chunk(&mut buf).unwrap(), 100);
        assert_eq!(req.read_body_chunk(&mut buf).unwrap(), 0);
        assert!(req.body_streamed());
    }

    #[test]
    fn test_no_content_length_means_no_body() {
        let descriptor = RequestDescriptor::new("GET", "/app/");
        let mut exchange = BufferedExchange::new(b"ignored".to_vec());
        let mut req = ServiceRequest::new(&descriptor, &mut exchange);
        assert!(req.first_body_chunk().unwrap().is_empty());
    }

    #[test]
    fn test_error_classification() {
        let unavailable = ServiceError::Unavailable { worker: "lb".into() };
        assert!(unavailable.is_recoverable());
        assert_eq!(unavailable.status_code(), 500);

        let client = ServiceError::Client(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(client.is_client_error());
        assert!(!client.is_recoverable());
        assert_eq!(client.status_code(), 400);

        let unmapped = ServiceError::Unmapped { uri: "/x".into() };
        assert_eq!(unmapped.status_code(), 404);
    }
}
