//! Status worker and worker snapshots.
//!
//! # Responsibilities
//! - Describe every worker as a serializable snapshot
//! - Serve the registry snapshot as a JSON response
//!
//! # Design Decisions
//! - The status worker holds a weak handle on the registry, so it never keeps it alive
//! - Snapshots are taken per request; nothing is cached

use std::sync::{OnceLock, Weak};

use serde::Serialize;

use crate::config::{ConfigError, Properties, WorkerType};
use crate::worker::{Endpoint, ServiceError, ServiceRequest, StateCell, Worker, WorkerRegistry, WorkerState};

/// Snapshot of one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: WorkerType,
    pub state: WorkerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ajp: Option<AjpStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balancer: Option<BalancerStatus>,
}

impl WorkerStatus {
    pub fn new(name: &str, kind: WorkerType, state: WorkerState) -> Self {
        Self {
            name: name.to_string(),
            kind,
            state,
            ajp: None,
            balancer: None,
        }
    }
}

/// Connection details of an AJP13 worker.
#[derive(Debug, Clone, Serialize)]
pub struct AjpStatus {
    pub host: String,
    pub port: u16,
    pub address: Option<String>,
    pub cached_endpoints: usize,
    pub cache_capacity: usize,
    pub requests: u64,
    pub errors: u64,
}

/// Balancer settings and member bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct BalancerStatus {
    pub sticky_session: bool,
    pub sticky_session_force: bool,
    pub recover_time_secs: u64,
    pub members: Vec<MemberStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberStatus {
    pub name: String,
    pub route: String,
    pub lb_factor: f64,
    pub lb_value: f64,
    pub in_error_state: bool,
    pub in_recovering: bool,
    /// Seconds since the member last failed.
    pub error_age_secs: Option<u64>,
    pub redirect: Option<String>,
    pub disabled: bool,
    pub stopped: bool,
    pub elected: u64,
    pub errors: u64,
    pub worker: WorkerStatus,
}

/// Whole-registry snapshot served by the status worker.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub workers: Vec<WorkerStatus>,
}

/// Diagnostic worker rendering the registry as JSON.
#[derive(Debug)]
pub struct StatusWorker {
    name: String,
    state: StateCell,
    registry: OnceLock<Weak<WorkerRegistry>>,
}

impl StatusWorker {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: StateCell::new(),
            registry: OnceLock::new(),
        }
    }

    /// Current snapshot; empty once the registry is gone.
    pub fn report(&self) -> StatusReport {
        let workers = self
            .registry
            .get()
            .and_then(Weak::upgrade)
            .map(|registry| registry.statuses())
            .unwrap_or_default();
        StatusReport { workers }
    }
}

impl Worker for StatusWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> WorkerType {
        WorkerType::Status
    }

    fn state(&self) -> WorkerState {
        self.state.get()
    }

    fn validate(&mut self, _props: &Properties) -> Result<(), ConfigError> {
        self.state
            .transition(&self.name, WorkerState::Unvalidated, WorkerState::Validated)
    }

    fn init(&mut self, _props: &Properties) -> Result<(), ConfigError> {
        self.state
            .transition(&self.name, WorkerState::Validated, WorkerState::Initialized)
    }

    fn get_endpoint(&self) -> Result<Box<dyn Endpoint + '_>, ServiceError> {
        self.state.ensure_ready(&self.name)?;
        Ok(Box::new(StatusEndpoint { worker: self }))
    }

    fn destroy(&self) {
        self.state.set(WorkerState::Destroyed);
    }

    fn status(&self) -> WorkerStatus {
        WorkerStatus::new(&self.name, WorkerType::Status, self.state.get())
    }

    fn attach_registry(&self, registry: Weak<WorkerRegistry>) {
        if self.registry.set(registry).is_err() {
            tracing::debug!(worker = %self.name, "Registry already attached");
        }
    }
}

struct StatusEndpoint<'w> {
    worker: &'w StatusWorker,
}

impl Endpoint for StatusEndpoint<'_> {
    fn service(&mut self, req: &mut ServiceRequest<'_>) -> Result<u16, ServiceError> {
        let body = match serde_json::to_vec_pretty(&self.worker.report()) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(worker = %self.worker.name, error = %e, "Failed to render status");
                req.write_headers(500, "Internal Server Error", &[])?;
                return Ok(500);
            }
        };

        let headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Content-Length".to_string(), body.len().to_string()),
        ];
        req.write_headers(200, "OK", &headers)?;
        if !req.descriptor.method.eq_ignore_ascii_case("HEAD") {
            req.write_body(&body)?;
        }
        Ok(200)
    }
}
