//! Typed worker settings read from the properties source.
//!
//! All settings types serialize (secrets excepted) so `check` and the
//! status worker can report the effective configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::loader::ConfigError;
use crate::config::properties::Properties;
use crate::protocol::codes::{DEF_BUFFER_SZ, MAX_BUFFER_SZ};

/// Worker kinds a configuration may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerType {
    Ajp13,
    Lb,
    Status,
}

impl WorkerType {
    /// The declared type of `name`; `ajp13` when not given.
    pub fn of(name: &str, props: &Properties) -> Result<Self, ConfigError> {
        match props.worker_get(name, "type") {
            None => Ok(WorkerType::Ajp13),
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: Properties::worker_key(name, "type"),
                value: raw.to_string(),
            }),
        }
    }
}

impl FromStr for WorkerType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ajp13" => Ok(WorkerType::Ajp13),
            "lb" => Ok(WorkerType::Lb),
            "status" => Ok(WorkerType::Status),
            _ => Err(()),
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerType::Ajp13 => "ajp13",
            WorkerType::Lb => "lb",
            WorkerType::Status => "status",
        };
        f.write_str(name)
    }
}

/// Settings of a single AJP13 backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AjpSettings {
    pub host: String,
    pub port: u16,
    /// Read/write timeout in seconds; 0 disables.
    pub socket_timeout_secs: u64,
    /// Connect timeout in milliseconds; 0 disables.
    pub connect_timeout_ms: u64,
    /// CPing probe timeout in milliseconds; 0 disables probing.
    pub prepost_timeout_ms: u64,
    pub socket_keepalive: bool,
    pub cache_size: usize,
    /// Idle seconds after which a pooled connection is dropped.
    pub cache_timeout_secs: u64,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub max_packet_size: usize,
}

impl Default for AjpSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8009,
            socket_timeout_secs: 0,
            connect_timeout_ms: 0,
            prepost_timeout_ms: 0,
            socket_keepalive: false,
            cache_size: 1,
            cache_timeout_secs: 15,
            secret: None,
            max_packet_size: DEF_BUFFER_SZ,
        }
    }
}

fn non_zero(value: u64, unit: fn(u64) -> Duration) -> Option<Duration> {
    (value > 0).then(|| unit(value))
}

impl AjpSettings {
    pub fn from_properties(name: &str, props: &Properties) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let key = |k: &str| Properties::worker_key(name, k);

        let max_packet_size = props
            .get_parsed::<usize>(&key("max_packet_size"))?
            .unwrap_or(defaults.max_packet_size);
        if !(DEF_BUFFER_SZ..=MAX_BUFFER_SZ).contains(&max_packet_size) {
            return Err(ConfigError::InvalidValue {
                key: key("max_packet_size"),
                value: max_packet_size.to_string(),
            });
        }

        Ok(Self {
            host: props
                .worker_get(name, "host")
                .map(str::to_string)
                .unwrap_or(defaults.host),
            port: props.get_parsed(&key("port"))?.unwrap_or(defaults.port),
            socket_timeout_secs: props
                .get_parsed(&key("socket_timeout"))?
                .unwrap_or(defaults.socket_timeout_secs),
            connect_timeout_ms: props
                .get_parsed(&key("connect_timeout"))?
                .unwrap_or(defaults.connect_timeout_ms),
            prepost_timeout_ms: props
                .get_parsed(&key("prepost_timeout"))?
                .unwrap_or(defaults.prepost_timeout_ms),
            socket_keepalive: props.get_bool(&key("socket_keepalive"), defaults.socket_keepalive)?,
            cache_size: props.get_parsed(&key("cachesize"))?.unwrap_or(defaults.cache_size),
            cache_timeout_secs: props
                .get_parsed(&key("cache_timeout"))?
                .unwrap_or(defaults.cache_timeout_secs),
            secret: props.worker_get(name, "secret").map(str::to_string),
            max_packet_size,
        })
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        non_zero(self.socket_timeout_secs, Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero(self.connect_timeout_ms, Duration::from_millis)
    }

    pub fn prepost_timeout(&self) -> Option<Duration> {
        non_zero(self.prepost_timeout_ms, Duration::from_millis)
    }

    pub fn cache_timeout(&self) -> Option<Duration> {
        non_zero(self.cache_timeout_secs, Duration::from_secs)
    }
}

/// Per-member settings a balancer reads from the member's own section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberSettings {
    pub lb_factor: f64,
    pub route: String,
    pub redirect: Option<String>,
    pub disabled: bool,
    pub stopped: bool,
}

impl MemberSettings {
    pub fn from_properties(name: &str, props: &Properties) -> Result<Self, ConfigError> {
        let key = |k: &str| Properties::worker_key(name, k);

        let lb_factor = props.get_parsed::<f64>(&key("lbfactor"))?.unwrap_or(1.0);
        if !(lb_factor.is_finite() && lb_factor > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: key("lbfactor"),
                value: lb_factor.to_string(),
            });
        }

        let route = props
            .worker_get(name, "route")
            .or_else(|| props.worker_get(name, "jvm_route"))
            .unwrap_or(name)
            .to_string();

        Ok(Self {
            lb_factor,
            route,
            redirect: props.worker_get(name, "redirect").map(str::to_string),
            disabled: props.get_bool(&key("disabled"), false)?,
            stopped: props.get_bool(&key("stopped"), false)?,
        })
    }
}

/// Settings of a load-balancer worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LbSettings {
    pub members: Vec<String>,
    pub sticky_session: bool,
    pub sticky_session_force: bool,
    pub recover_time_secs: u64,
    pub maintain_secs: u64,
}

impl Default for LbSettings {
    fn default() -> Self {
        Self {
            members: Vec::new(),
            sticky_session: true,
            sticky_session_force: false,
            recover_time_secs: 60,
            maintain_secs: 60,
        }
    }
}

impl LbSettings {
    pub fn from_properties(name: &str, props: &Properties) -> Result<Self, ConfigError> {
        let key = |k: &str| Properties::worker_key(name, k);

        let members: Vec<String> = Self::member_names(name, props)
            .into_iter()
            .map(str::to_string)
            .collect();
        if members.is_empty() {
            return Err(ConfigError::Missing(key("balance_workers")));
        }

        let defaults = Self::default();
        Ok(Self {
            members,
            sticky_session: props.get_bool(&key("sticky_session"), defaults.sticky_session)?,
            sticky_session_force: props
                .get_bool(&key("sticky_session_force"), defaults.sticky_session_force)?,
            recover_time_secs: props
                .get_parsed(&key("recover_time"))?
                .unwrap_or(defaults.recover_time_secs),
            maintain_secs: props.get_parsed(&key("maintain"))?.unwrap_or(defaults.maintain_secs),
        })
    }

    /// Members named by `balance_workers` (or the older `balanced_workers`).
    pub fn member_names<'a>(name: &str, props: &'a Properties) -> Vec<&'a str> {
        let primary = props.get_list(&Properties::worker_key(name, "balance_workers"));
        if primary.is_empty() {
            props.get_list(&Properties::worker_key(name, "balanced_workers"))
        } else {
            primary
        }
    }

    pub fn recover_time(&self) -> Duration {
        Duration::from_secs(self.recover_time_secs)
    }

    pub fn maintain_interval(&self) -> Duration {
        Duration::from_secs(self.maintain_secs)
    }
}

/// `log.level`, defaulting to `info`.
pub fn log_level(props: &Properties) -> &str {
    props.get("log.level").unwrap_or("info")
}
