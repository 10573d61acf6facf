//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation of the properties source (syntax is the parser's job)
//! - Check referential integrity (mounts and balancers reference defined workers)
//! - Validate value ranges and types (ports, factors, booleans, packet sizes)
//! - Detect balancer cycles and duplicate session routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: Properties → Result<(), Vec<ValidationError>>
//! - Runs before a configuration is accepted; nothing is resolved or connected here

use std::collections::HashMap;

use thiserror::Error;

use crate::config::properties::Properties;
use crate::config::schema::{AjpSettings, LbSettings, MemberSettings, WorkerType};
use crate::routing::matcher::parse_mount;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("worker.list is missing or empty")]
    NoWorkers,

    #[error("worker {worker}: {message}")]
    InvalidWorker { worker: String, message: String },

    #[error("balancer {balancer}: member {member} is not defined")]
    UndefinedMember { balancer: String, member: String },

    #[error("balancer {balancer}: route {route:?} is used by both {first} and {second}")]
    DuplicateRoute {
        balancer: String,
        route: String,
        first: String,
        second: String,
    },

    #[error("balancer {balancer}: members form a cycle through {member}")]
    Cycle { balancer: String, member: String },

    #[error("mount {pattern}: {message}")]
    InvalidMount { pattern: String, message: String },

    #[error("mount {pattern} references {worker}, which is not in worker.list")]
    UnknownMountWorker { pattern: String, worker: String },
}

/// Validate a connector configuration, collecting every error.
pub fn validate(props: &Properties) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let workers = props.worker_list();
    if workers.is_empty() {
        errors.push(ValidationError::NoWorkers);
    }

    for name in &workers {
        validate_worker(name, props, &mut errors);
    }

    for mount in props.mounts() {
        match parse_mount(&mount.pattern, &mount.worker) {
            Err(e) => errors.push(ValidationError::InvalidMount {
                pattern: mount.pattern.clone(),
                message: e.to_string(),
            }),
            Ok(_) if !workers.contains(&mount.worker.trim()) => {
                errors.push(ValidationError::UnknownMountWorker {
                    pattern: mount.pattern.clone(),
                    worker: mount.worker.clone(),
                })
            }
            Ok(_) => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn invalid(worker: &str, message: impl ToString) -> ValidationError {
    ValidationError::InvalidWorker {
        worker: worker.to_string(),
        message: message.to_string(),
    }
}

fn validate_worker(name: &str, props: &Properties, errors: &mut Vec<ValidationError>) {
    let kind = match WorkerType::of(name, props) {
        Ok(kind) => kind,
        Err(e) => {
            errors.push(invalid(name, e));
            return;
        }
    };

    match kind {
        WorkerType::Ajp13 => validate_ajp(name, props, errors),
        WorkerType::Status => {}
        WorkerType::Lb => validate_lb(name, props, errors),
    }
}

fn validate_ajp(name: &str, props: &Properties, errors: &mut Vec<ValidationError>) {
    match AjpSettings::from_properties(name, props) {
        Ok(settings) => {
            if settings.host.trim().is_empty() {
                errors.push(invalid(name, "host is empty"));
            }
            if settings.port == 0 {
                errors.push(invalid(name, "port must be non-zero"));
            }
        }
        Err(e) => errors.push(invalid(name, e)),
    }
}

fn validate_lb(name: &str, props: &Properties, errors: &mut Vec<ValidationError>) {
    if let Err(e) = LbSettings::from_properties(name, props) {
        errors.push(invalid(name, e));
        return;
    }

    let mut routes: HashMap<String, &str> = HashMap::new();
    for member in LbSettings::member_names(name, props) {
        if !props.defines_worker(member) {
            errors.push(ValidationError::UndefinedMember {
                balancer: name.to_string(),
                member: member.to_string(),
            });
            continue;
        }

        match WorkerType::of(member, props) {
            Ok(WorkerType::Ajp13) => validate_ajp(member, props, errors),
            Ok(WorkerType::Lb) => {
                let mut path = vec![name.to_string()];
                if let Some(looped) = find_cycle(member, props, &mut path) {
                    errors.push(ValidationError::Cycle {
                        balancer: name.to_string(),
                        member: looped,
                    });
                }
            }
            Ok(WorkerType::Status) => errors.push(invalid(member, "a status worker cannot be balanced")),
            Err(e) => errors.push(invalid(member, e)),
        }

        match MemberSettings::from_properties(member, props) {
            Ok(settings) => {
                if let Some(first) = routes.insert(settings.route.clone(), member) {
                    errors.push(ValidationError::DuplicateRoute {
                        balancer: name.to_string(),
                        route: settings.route,
                        first: first.to_string(),
                        second: member.to_string(),
                    });
                }
            }
            Err(e) => errors.push(invalid(member, e)),
        }
    }
}

/// Depth-first walk over nested balancers; returns the first worker seen twice.
fn find_cycle(name: &str, props: &Properties, path: &mut Vec<String>) -> Option<String> {
    if path.iter().any(|p| p == name) {
        return Some(name.to_string());
    }
    if !matches!(WorkerType::of(name, props), Ok(WorkerType::Lb)) {
        return None;
    }
    path.push(name.to_string());
    for member in LbSettings::member_names(name, props) {
        if let Some(found) = find_cycle(member, props, path) {
            return Some(found);
        }
    }
    path.pop();
    None
}
