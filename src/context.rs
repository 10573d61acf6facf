//! Connector context.
//!
//! # Responsibilities
//! - Own the log dispatcher, the URI map and the worker registry
//! - Expose the adapter-facing calls: resolve a worker, service a request
//! - Drive reload, refresh and teardown in a fixed order
//!
//! # Design Decisions
//! - No process-wide state: every call runs under the context's own dispatcher
//! - Failures become a status code for the adapter; detail goes to the log only
//! - Shutdown destroys every worker exactly once, also on drop

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use notify::RecommendedWatcher;
use tracing::{dispatcher, Dispatch};

use crate::config::schema::log_level;
use crate::config::{load_properties, validate, ConfigError, Mount, MountWatcher, Properties};
use crate::http::{AdapterCallbacks, RequestDescriptor};
use crate::observability::logging::build_dispatch;
use crate::observability::metrics;
use crate::observability::tracing::request_span;
use crate::routing::{RuleTable, UriWorkerMap};
use crate::worker::{ServiceError, ServiceRequest, Worker, WorkerRegistry, WorkerStatus};

/// Everything one connector instance needs, passed explicitly.
pub struct ConnectorContext {
    dispatch: Dispatch,
    uri_map: Arc<UriWorkerMap>,
    registry: Arc<WorkerRegistry>,
    shut_down: AtomicBool,
}

impl ConnectorContext {
    /// Validate `props` and build a context logging at `log.level`.
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        Self::with_dispatch(props, build_dispatch(log_level(props)))
    }

    /// Like `from_properties`, logging through `dispatch`.
    pub fn with_dispatch(props: &Properties, dispatch: Dispatch) -> Result<Self, ConfigError> {
        let (uri_map, registry) = dispatcher::with_default(&dispatch, || {
            validate(props).map_err(ConfigError::Validation)?;
            let registry = WorkerRegistry::from_properties(props)?;
            let uri_map = Arc::new(UriWorkerMap::from_properties(props)?);
            tracing::info!(
                workers = registry.len(),
                rules = uri_map.table().rules().len(),
                "Connector context ready"
            );
            Ok::<_, ConfigError>((uri_map, registry))
        })?;
        Ok(Self::from_parts(uri_map, registry, dispatch))
    }

    /// Assemble a context from already built parts.
    pub fn from_parts(uri_map: Arc<UriWorkerMap>, registry: Arc<WorkerRegistry>, dispatch: Dispatch) -> Self {
        Self {
            dispatch,
            uri_map,
            registry,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Load a properties file and build a context from it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let props = load_properties(path)?;
        Self::from_properties(&props)
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn uri_map(&self) -> &Arc<UriWorkerMap> {
        &self.uri_map
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn worker(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.registry.get(name)
    }

    /// Name of the worker serving `uri`.
    pub fn resolve_worker(&self, uri: &str) -> Option<Arc<str>> {
        dispatcher::with_default(&self.dispatch, || self.uri_map.resolve_worker(uri))
    }

    /// Run one request; errors are returned with full detail.
    pub fn try_service(
        &self,
        req: &RequestDescriptor,
        callbacks: &mut dyn AdapterCallbacks,
    ) -> Result<u16, ServiceError> {
        dispatcher::with_default(&self.dispatch, || self.dispatch_request(req, callbacks))
    }

    /// Run one request and return the status for the adapter.
    ///
    /// Failures map to 404 (unmapped), 400 (client aborted) or 500; the
    /// reason is logged and never sent to the client.
    pub fn service(&self, req: &RequestDescriptor, callbacks: &mut dyn AdapterCallbacks) -> u16 {
        dispatcher::with_default(&self.dispatch, || match self.dispatch_request(req, callbacks) {
            Ok(status) => status,
            Err(e) => {
                match &e {
                    ServiceError::Unmapped { .. } => {
                        tracing::debug!(request_id = %req.request_id, error = %e, "Request not mapped")
                    }
                    ServiceError::Client(_) => {
                        tracing::info!(request_id = %req.request_id, error = %e, "Client went away")
                    }
                    _ => tracing::error!(request_id = %req.request_id, error = %e, "Request failed"),
                }
                e.status_code()
            }
        })
    }

    fn dispatch_request(
        &self,
        req: &RequestDescriptor,
        callbacks: &mut dyn AdapterCallbacks,
    ) -> Result<u16, ServiceError> {
        let span = request_span(req.request_id, &req.method, &req.uri);
        let _enter = span.enter();
        let start = Instant::now();

        let name = self
            .uri_map
            .resolve_worker(&req.uri)
            .ok_or_else(|| ServiceError::Unmapped { uri: req.uri.clone() })?;
        let worker = self
            .registry
            .get(&name)
            .ok_or_else(|| ServiceError::UnknownWorker(name.to_string()))?;
        tracing::debug!(worker = %name, "Worker resolved");

        let mut request = ServiceRequest::new(req, callbacks);
        let result = worker.get_endpoint().and_then(|mut endpoint| {
            let result = endpoint.service(&mut request);
            endpoint.done();
            result
        });

        let status = match &result {
            Ok(status) => *status,
            Err(e) => e.status_code(),
        };
        metrics::record_request(&name, status, start);
        result
    }

    /// Swap in a new rule set; every rule must name a registered worker.
    pub fn reload_mounts(&self, mounts: &[Mount]) -> Result<u64, ConfigError> {
        dispatcher::with_default(&self.dispatch, || {
            if let Err(err) = self.check_mounts(mounts) {
                tracing::error!(error = %err, "Mount reload rejected, keeping current rules");
                return Err(err);
            }
            self.uri_map.reload(mounts)
        })
    }

    fn check_mounts(&self, mounts: &[Mount]) -> Result<(), ConfigError> {
        match mounts.iter().find(|m| !self.registry.contains(m.worker.trim())) {
            Some(unknown) => Err(ConfigError::InvalidRule {
                pattern: unknown.pattern.clone(),
                reason: format!("unknown worker {}", unknown.worker),
            }),
            None => Ok(()),
        }
    }

    /// Re-apply worker settings and mounts from a changed configuration.
    ///
    /// The worker set itself is fixed for the lifetime of the context.
    /// Everything is checked before anything is applied, so a rejected
    /// configuration leaves workers and rules as they were.
    pub fn refresh(&self, props: &Properties) -> Result<(), ConfigError> {
        dispatcher::with_default(&self.dispatch, || {
            let mounts = props.mounts();
            let checked = validate(props)
                .map_err(ConfigError::Validation)
                .and_then(|()| self.check_mounts(&mounts))
                .and_then(|()| RuleTable::build(&mounts, 0).map(|_| ()))
                .and_then(|()| self.registry.check_refresh(props));
            if let Err(err) = checked {
                tracing::error!(error = %err, "Refresh rejected, keeping current configuration");
                return Err(err);
            }

            self.registry.refresh(props)?;
            let generation = self.uri_map.reload(&mounts)?;
            tracing::info!(generation, "Configuration refreshed");
            Ok(())
        })
    }

    /// Watch a mount file and reload the URI map when it changes.
    ///
    /// Keep the returned watcher alive for as long as reloads are wanted.
    pub fn watch_mounts(&self, path: &Path) -> Result<RecommendedWatcher, notify::Error> {
        MountWatcher::new(path, Arc::clone(&self.uri_map))
            .with_known_workers(self.registry.names())
            .with_dispatch(self.dispatch.clone())
            .run()
    }

    /// Snapshot of every registered worker.
    pub fn status(&self) -> Vec<WorkerStatus> {
        self.registry.statuses()
    }

    /// Destroy every worker. Later calls do nothing.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        dispatcher::with_default(&self.dispatch, || {
            self.registry.destroy_all();
            tracing::info!("Connector shut down");
        });
    }
}

impl Drop for ConnectorContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ConnectorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorContext")
            .field("uri_map", &self.uri_map)
            .field("workers", &self.registry.names())
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish()
    }
}
