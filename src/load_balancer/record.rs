//! Per-member bookkeeping of a balancer.
//!
//! # Responsibilities
//! - Hold a member's configured weight, route and flags
//! - Track accumulated load (`lb_value`) and error state
//!
//! # Design Decisions
//! - Records are plain data; the owning balancer serializes every mutation under its lock
//! - Error time is a monotonic `Instant` and is not serialized

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::MemberSettings;

/// State of one balancer member.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerRecord {
    pub name: String,
    /// Session route that pins requests to this member.
    pub route: String,
    /// Added to `lb_value` on every balanced selection.
    pub lb_factor: f64,
    pub lb_value: f64,
    pub in_error_state: bool,
    pub in_recovering: bool,
    #[serde(skip)]
    pub error_time: Option<Instant>,
    pub redirect: Option<String>,
    /// Hot standby: serves only its own sessions.
    pub disabled: bool,
    /// Receives nothing.
    pub stopped: bool,
    pub elected: u64,
    pub errors: u64,
}

impl WorkerRecord {
    pub fn new(name: &str, settings: &MemberSettings) -> Self {
        let mut record = Self {
            name: name.to_string(),
            route: String::new(),
            lb_factor: 1.0,
            lb_value: 0.0,
            in_error_state: false,
            in_recovering: false,
            error_time: None,
            redirect: None,
            disabled: false,
            stopped: false,
            elected: 0,
            errors: 0,
        };
        record.apply(settings);
        record
    }

    /// Take over configured values; runtime state is left alone.
    pub fn apply(&mut self, settings: &MemberSettings) {
        self.route = settings.route.clone();
        self.lb_factor = settings.lb_factor;
        self.redirect = settings.redirect.clone();
        self.disabled = settings.disabled;
        self.stopped = settings.stopped;
    }

    /// Eligible for balanced selection.
    pub fn is_usable(&self) -> bool {
        !self.in_error_state && !self.disabled && !self.stopped
    }

    /// In error and past its recovery window.
    pub fn recovery_due(&self, now: Instant, recover_time: Duration) -> bool {
        self.in_error_state
            && self
                .error_time
                .map_or(true, |t| now.saturating_duration_since(t) >= recover_time)
    }

    pub fn mark_success(&mut self) {
        self.in_error_state = false;
        self.in_recovering = false;
        self.error_time = None;
    }

    pub fn mark_error(&mut self, now: Instant) {
        self.in_error_state = true;
        self.in_recovering = false;
        self.error_time = Some(now);
        self.errors += 1;
    }

    /// Put the member back into rotation at `lb_value`.
    pub fn recover(&mut self, lb_value: f64) {
        self.in_error_state = false;
        self.in_recovering = true;
        self.error_time = None;
        self.lb_value = lb_value;
    }
}
