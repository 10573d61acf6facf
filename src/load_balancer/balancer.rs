//! Load-balancer worker.
//!
//! # Responsibilities
//! - Choose a member per attempt: session affinity first, then lowest `lb_value`
//! - Fail over to another member when an attempt fails recoverably
//! - Put failed members back into rotation after the recovery window
//!
//! # Design Decisions
//! - One mutex per balancer guards every record; selection and increment are a single critical section
//! - The lock is never held across a member's network exchange
//! - Ties on `lb_value` rotate through members so equal weights alternate
//! - Maintenance runs lazily from the request path, at most once per interval

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use crate::config::{ConfigError, LbSettings, MemberSettings, Properties, WorkerType};
use crate::load_balancer::record::WorkerRecord;
use crate::load_balancer::session::session_routes;
use crate::observability::metrics;
use crate::worker::status::{BalancerStatus, MemberStatus};
use crate::worker::{
    Endpoint, ServiceError, ServiceRequest, StateCell, Worker, WorkerRegistry, WorkerState, WorkerStatus,
};

/// Mutable balancer state, guarded by one lock.
#[derive(Debug)]
struct LbState {
    records: Vec<WorkerRecord>,
    /// Where the next tie-break scan starts.
    next_offset: usize,
    last_maintain: Instant,
    settings: LbSettings,
}

/// A member chosen for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub index: usize,
    pub route: String,
}

/// A worker spreading requests over a group of members.
#[derive(Debug)]
pub struct LbWorker {
    name: String,
    state: StateCell,
    members: Vec<Arc<dyn Worker>>,
    lb: Mutex<LbState>,
}

impl LbWorker {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: StateCell::new(),
            members: Vec::new(),
            lb: Mutex::new(LbState {
                records: Vec::new(),
                next_offset: 0,
                last_maintain: Instant::now(),
                settings: LbSettings::default(),
            }),
        }
    }

    /// Member names from the validated settings.
    pub fn member_names(&self) -> Vec<String> {
        self.lock().settings.members.clone()
    }

    /// Attach a member and its record. Members are added before `init`.
    pub fn add_member(&mut self, record: WorkerRecord, worker: Arc<dyn Worker>) {
        self.lb
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .push(record);
        self.members.push(worker);
    }

    /// Copy of every member record.
    pub fn records(&self) -> Vec<WorkerRecord> {
        self.lock().records.clone()
    }

    fn lock(&self) -> MutexGuard<'_, LbState> {
        self.lb.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parse the balancer and every member record from `props`.
    fn refreshed_settings(&self, props: &Properties) -> Result<(LbSettings, Vec<MemberSettings>), ConfigError> {
        let settings = LbSettings::from_properties(&self.name, props)?;
        let members = self
            .members
            .iter()
            .map(|member| MemberSettings::from_properties(member.name(), props))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((settings, members))
    }

    /// Pick the member for one attempt.
    ///
    /// `tried` marks members already used by this request. Returns `Ok(None)`
    /// when nothing is eligible, and `Unavailable` when a forced sticky
    /// session cannot be honoured.
    pub fn select(
        &self,
        now: Instant,
        routes: &[String],
        tried: &[bool],
        first_attempt: bool,
    ) -> Result<Option<Selection>, ServiceError> {
        let mut guard = self.lock();
        maintain(&mut guard, now, &self.name);
        let LbState {
            records,
            next_offset,
            settings,
            ..
        } = &mut *guard;
        let is_tried = |i: usize| tried.get(i).copied().unwrap_or(false);

        if settings.sticky_session {
            if let Some(i) = routes
                .iter()
                .find_map(|route| records.iter().position(|r| &r.route == route))
            {
                let record = &records[i];
                let reactivate = record.in_error_state
                    && first_attempt
                    && record.recovery_due(now, settings.recover_time());
                if !is_tried(i) && !record.stopped && (!record.in_error_state || reactivate) {
                    if reactivate {
                        let lb_value = records[i].lb_value;
                        records[i].recover(lb_value);
                        tracing::info!(balancer = %self.name, member = %records[i].name, "Session member recovered");
                    }
                    return Ok(Some(elect(records, i)));
                }

                let redirect = records[i]
                    .redirect
                    .as_deref()
                    .and_then(|name| records.iter().position(|r| r.name == name))
                    .filter(|&j| !is_tried(j) && records[j].is_usable());
                if let Some(j) = redirect {
                    tracing::debug!(
                        balancer = %self.name,
                        from = %records[i].name,
                        to = %records[j].name,
                        "Session member unavailable, redirecting"
                    );
                    return Ok(Some(elect(records, j)));
                }
                if settings.sticky_session_force {
                    tracing::warn!(
                        balancer = %self.name,
                        member = %records[i].name,
                        "Session member unavailable and sticky sessions are forced"
                    );
                    return Err(ServiceError::Unavailable {
                        worker: self.name.clone(),
                    });
                }
            }
        }

        let count = records.len();
        let mut best: Option<usize> = None;
        for k in 0..count {
            let i = (*next_offset + k) % count;
            if is_tried(i) || !records[i].is_usable() {
                continue;
            }
            if best.map_or(true, |b| records[i].lb_value < records[b].lb_value) {
                best = Some(i);
            }
        }
        if let Some(i) = best {
            *next_offset = (i + 1) % count;
            records[i].lb_value += records[i].lb_factor;
            return Ok(Some(elect(records, i)));
        }

        let recover_time = settings.recover_time();
        let oldest = records
            .iter()
            .enumerate()
            .filter(|(i, r)| !is_tried(*i) && !r.disabled && !r.stopped && r.recovery_due(now, recover_time))
            .min_by_key(|(_, r)| r.error_time)
            .map(|(i, _)| i);
        if let Some(i) = oldest {
            let lb_value = max_lb_value(records) + records[i].lb_factor;
            records[i].recover(lb_value);
            tracing::info!(balancer = %self.name, member = %records[i].name, "Member recovered after error");
            return Ok(Some(elect(records, i)));
        }

        Ok(None)
    }

    pub fn mark_success(&self, index: usize) {
        if let Some(record) = self.lock().records.get_mut(index) {
            record.mark_success();
        }
    }

    pub fn mark_error(&self, index: usize, now: Instant) {
        if let Some(record) = self.lock().records.get_mut(index) {
            record.mark_error(now);
        }
    }
}

fn elect(records: &mut [WorkerRecord], index: usize) -> Selection {
    records[index].elected += 1;
    Selection {
        index,
        route: records[index].route.clone(),
    }
}

fn max_lb_value(records: &[WorkerRecord]) -> f64 {
    records.iter().map(|r| r.lb_value).fold(0.0, f64::max)
}

/// Relax members whose recovery window elapsed, once per interval.
fn maintain(state: &mut LbState, now: Instant, balancer: &str) {
    if now.saturating_duration_since(state.last_maintain) < state.settings.maintain_interval() {
        return;
    }
    state.last_maintain = now;
    let recover_time = state.settings.recover_time();
    let max = max_lb_value(&state.records);
    for record in &mut state.records {
        if record.recovery_due(now, recover_time) {
            record.recover(max);
            tracing::info!(balancer = %balancer, member = %record.name, "Member back in rotation");
        }
    }
}

impl Worker for LbWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> WorkerType {
        WorkerType::Lb
    }

    fn state(&self) -> WorkerState {
        self.state.get()
    }

    fn validate(&mut self, props: &Properties) -> Result<(), ConfigError> {
        let settings = LbSettings::from_properties(&self.name, props)?;
        self.state
            .transition(&self.name, WorkerState::Unvalidated, WorkerState::Validated)?;
        self.lb.get_mut().unwrap_or_else(PoisonError::into_inner).settings = settings;
        Ok(())
    }

    fn init(&mut self, _props: &Properties) -> Result<(), ConfigError> {
        if self.members.is_empty() {
            return Err(ConfigError::Missing(Properties::worker_key(&self.name, "balance_workers")));
        }
        self.state
            .transition(&self.name, WorkerState::Validated, WorkerState::Initialized)?;
        tracing::debug!(balancer = %self.name, members = self.members.len(), "Balancer initialized");
        Ok(())
    }

    fn get_endpoint(&self) -> Result<Box<dyn Endpoint + '_>, ServiceError> {
        self.state.ensure_ready(&self.name)?;
        Ok(Box::new(LbEndpoint { worker: self }))
    }

    fn destroy(&self) {
        self.state.set(WorkerState::Destroyed);
        for member in &self.members {
            member.destroy();
        }
    }

    fn status(&self) -> WorkerStatus {
        let (settings, records) = {
            let lb = self.lock();
            (lb.settings.clone(), lb.records.clone())
        };
        let now = Instant::now();
        let members = records
            .into_iter()
            .zip(&self.members)
            .map(|(r, worker)| MemberStatus {
                error_age_secs: r.error_time.map(|t| now.saturating_duration_since(t).as_secs()),
                worker: worker.status(),
                name: r.name,
                route: r.route,
                lb_factor: r.lb_factor,
                lb_value: r.lb_value,
                in_error_state: r.in_error_state,
                in_recovering: r.in_recovering,
                redirect: r.redirect,
                disabled: r.disabled,
                stopped: r.stopped,
                elected: r.elected,
                errors: r.errors,
            })
            .collect();

        let mut status = WorkerStatus::new(&self.name, WorkerType::Lb, self.state.get());
        status.balancer = Some(BalancerStatus {
            sticky_session: settings.sticky_session,
            sticky_session_force: settings.sticky_session_force,
            recover_time_secs: settings.recover_time_secs,
            members,
        });
        status
    }

    fn check_refresh(&self, props: &Properties) -> Result<(), ConfigError> {
        self.refreshed_settings(props)?;
        for member in &self.members {
            member.check_refresh(props)?;
        }
        Ok(())
    }

    fn refresh(&self, props: &Properties) -> Result<(), ConfigError> {
        let (settings, updated) = self.refreshed_settings(props)?;
        for member in &self.members {
            member.check_refresh(props)?;
        }
        for member in &self.members {
            member.refresh(props)?;
        }

        let mut lb = self.lock();
        for (record, member) in lb.records.iter_mut().zip(&updated) {
            record.apply(member);
            record.lb_value = 0.0;
        }
        lb.settings.sticky_session = settings.sticky_session;
        lb.settings.sticky_session_force = settings.sticky_session_force;
        lb.settings.recover_time_secs = settings.recover_time_secs;
        lb.settings.maintain_secs = settings.maintain_secs;
        tracing::info!(balancer = %self.name, "Balancer settings refreshed");
        Ok(())
    }

    fn attach_registry(&self, registry: Weak<WorkerRegistry>) {
        for member in &self.members {
            member.attach_registry(registry.clone());
        }
    }
}

/// Request-scoped endpoint of an `LbWorker`.
struct LbEndpoint<'w> {
    worker: &'w LbWorker,
}

impl Endpoint for LbEndpoint<'_> {
    fn service(&mut self, req: &mut ServiceRequest<'_>) -> Result<u16, ServiceError> {
        let lb = self.worker;
        lb.state.ensure_ready(&lb.name)?;

        let routes = session_routes(req.descriptor);
        let mut tried = vec![false; lb.members.len()];

        for attempt in 0..lb.members.len() {
            let Some(selection) = lb.select(Instant::now(), &routes, &tried, attempt == 0)? else {
                break;
            };
            tried[selection.index] = true;
            let member = &lb.members[selection.index];
            tracing::debug!(
                balancer = %lb.name,
                member = %member.name(),
                route = %selection.route,
                attempt,
                "Member selected"
            );
            req.route = Some(selection.route);

            let result = member.get_endpoint().and_then(|mut endpoint| {
                let result = endpoint.service(req);
                endpoint.done();
                result
            });

            match result {
                Ok(status) => {
                    lb.mark_success(selection.index);
                    return Ok(status);
                }
                Err(e) if e.is_client_error() => return Err(e),
                Err(e) => {
                    lb.mark_error(selection.index, Instant::now());
                    if !e.is_recoverable() {
                        tracing::error!(
                            balancer = %lb.name,
                            member = %member.name(),
                            error = %e,
                            "Unrecoverable member failure"
                        );
                        return Err(e);
                    }
                    tracing::warn!(
                        balancer = %lb.name,
                        member = %member.name(),
                        attempt,
                        error = %e,
                        "Member failed, trying another"
                    );
                    metrics::record_failover(&lb.name);
                }
            }
        }

        tracing::warn!(balancer = %lb.name, "No usable member left");
        Err(ServiceError::Unavailable {
            worker: lb.name.clone(),
        })
    }
}
