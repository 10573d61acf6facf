//! Worker factory and registry.
//!
//! # Responsibilities
//! - Build workers of every kind from the properties source
//! - Run validate and init on each, members before their balancer
//! - Look workers up by name for the dispatcher
//!
//! # Design Decisions
//! - Balancer members are owned by their balancer, not registered on their own
//! - Nesting depth is bounded; cycles are already rejected by validation

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::{ConfigError, MemberSettings, Properties, WorkerType};
use crate::load_balancer::{LbWorker, WorkerRecord};
use crate::worker::{Ajp13Worker, StatusWorker, Worker, WorkerStatus};

/// Deepest balancer-of-balancers nesting accepted.
pub const MAX_DEPTH: usize = 8;

/// Build, validate and initialise the worker `name`.
pub fn create_worker(name: &str, props: &Properties) -> Result<Arc<dyn Worker>, ConfigError> {
    build(name, props, 0)
}

fn build(name: &str, props: &Properties, depth: usize) -> Result<Arc<dyn Worker>, ConfigError> {
    if depth > MAX_DEPTH {
        return Err(ConfigError::InvalidValue {
            key: Properties::worker_key(name, "balance_workers"),
            value: format!("nesting deeper than {MAX_DEPTH}"),
        });
    }

    let worker: Arc<dyn Worker> = match WorkerType::of(name, props)? {
        WorkerType::Ajp13 => {
            let mut worker = Ajp13Worker::new(name);
            worker.validate(props)?;
            worker.init(props)?;
            Arc::new(worker)
        }
        WorkerType::Lb => {
            let mut worker = LbWorker::new(name);
            worker.validate(props)?;
            for member in worker.member_names() {
                let settings = MemberSettings::from_properties(&member, props)?;
                let child = build(&member, props, depth + 1)?;
                worker.add_member(WorkerRecord::new(&member, &settings), child);
            }
            worker.init(props)?;
            Arc::new(worker)
        }
        WorkerType::Status => {
            let mut worker = StatusWorker::new(name);
            worker.validate(props)?;
            worker.init(props)?;
            Arc::new(worker)
        }
    };

    tracing::debug!(worker = %name, kind = %worker.kind(), depth, "Worker created");
    Ok(worker)
}

/// Named top-level workers.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: DashMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create every worker in `worker.list`.
    pub fn from_properties(props: &Properties) -> Result<Arc<Self>, ConfigError> {
        let registry = Self::new();
        for name in props.worker_list() {
            let worker = create_worker(name, props)?;
            tracing::info!(worker = %name, kind = %worker.kind(), "Worker initialized");
            registry.insert(worker);
        }
        let registry = Arc::new(registry);
        registry.attach_all();
        Ok(registry)
    }

    /// Register a worker under its own name, replacing any previous one.
    pub fn insert(&self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.name().to_string(), worker);
    }

    /// Hand every worker a weak handle on this registry.
    pub fn attach_all(self: &Arc<Self>) {
        for entry in self.workers.iter() {
            entry.value().attach_registry(Arc::downgrade(self));
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Snapshot of every worker, sorted by name.
    pub fn statuses(&self) -> Vec<WorkerStatus> {
        self.names()
            .iter()
            .filter_map(|name| self.get(name))
            .map(|worker| worker.status())
            .collect()
    }

    /// Check every worker against `props` without changing any of them.
    pub fn check_refresh(&self, props: &Properties) -> Result<(), ConfigError> {
        for name in self.names() {
            if let Some(worker) = self.get(&name) {
                worker.check_refresh(props)?;
            }
        }
        Ok(())
    }

    /// Re-apply runtime settings to every worker; returns the first failure.
    pub fn refresh(&self, props: &Properties) -> Result<(), ConfigError> {
        for name in self.names() {
            if let Some(worker) = self.get(&name) {
                worker.refresh(props)?;
            }
        }
        Ok(())
    }

    /// Destroy every worker.
    pub fn destroy_all(&self) {
        for name in self.names() {
            if let Some(worker) = self.get(&name) {
                worker.destroy();
                tracing::info!(worker = %name, "Worker destroyed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerState;

    fn props(text: &str) -> Properties {
        Properties::parse(text).unwrap()
    }

    #[test]
    fn test_registry_builds_every_kind() {
        let registry = WorkerRegistry::from_properties(&props(
            "worker.list=lb,status\n\
             worker.a.host=127.0.0.1\n\
             worker.b.host=127.0.0.1\n\
             worker.b.port=8010\n\
             worker.lb.type=lb\n\
             worker.lb.balance_workers=a,b\n\
             worker.status.type=status\n",
        ))
        .unwrap();

        assert_eq!(registry.names(), vec!["lb".to_string(), "status".to_string()]);
        assert!(!registry.contains("a"));

        let lb = registry.get("lb").unwrap();
        assert_eq!(lb.kind(), WorkerType::Lb);
        assert_eq!(lb.state(), WorkerState::Initialized);

        let status = lb.status();
        let members = status.balancer.unwrap().members;
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].worker.ajp.as_ref().unwrap().port, 8010);
    }

    #[test]
    fn test_nested_balancer() {
        let registry = WorkerRegistry::from_properties(&props(
            "worker.list=outer\n\
             worker.a.host=127.0.0.1\n\
             worker.inner.type=lb\n\
             worker.inner.balance_workers=a\n\
             worker.outer.type=lb\n\
             worker.outer.balance_workers=inner\n",
        ))
        .unwrap();
        let outer = registry.get("outer").unwrap().status();
        let inner = &outer.balancer.unwrap().members[0].worker;
        assert_eq!(inner.kind, WorkerType::Lb);
    }

    #[test]
    fn test_destroy_all() {
        let registry = WorkerRegistry::from_properties(&props(
            "worker.list=a\nworker.a.host=127.0.0.1\n",
        ))
        .unwrap();
        registry.destroy_all();
        let worker = registry.get("a").unwrap();
        assert_eq!(worker.state(), WorkerState::Destroyed);
        assert!(worker.get_endpoint().is_err());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = WorkerRegistry::from_properties(&props(
            "worker.list=a\nworker.a.type=jni\n",
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
