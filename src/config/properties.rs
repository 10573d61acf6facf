//! Flat `key=value` properties source.
//!
//! # Responsibilities
//! - Parse the properties syntax (comments, continuations, `$(key)` substitution)
//! - Typed accessors with precise error reporting
//! - Extract URI mount rules
//!
//! # Design Decisions
//! - Insertion order is preserved; a later duplicate overrides the value in place
//! - `$(key)` resolves against earlier properties, then the environment; unknown
//!   references are left as written
//! - Entries with an empty key or value are ignored

use std::collections::HashMap;
use std::str::FromStr;

use crate::config::loader::ConfigError;

/// Bound on `$(...)` expansions in a single value.
const MAX_SUBSTITUTIONS: usize = 20;

/// A URI mount rule as written in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub pattern: String,
    pub worker: String,
}

/// Ordered key/value configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse properties text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut props = Properties::new();
        let mut pending: Option<(usize, String)> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = strip_comment(raw).trim();

            let (start, line) = match pending.take() {
                Some((start, mut acc)) => {
                    acc.push_str(line);
                    (start, acc)
                }
                None => (line_no, line.to_string()),
            };

            if let Some(head) = line.strip_suffix('\\') {
                pending = Some((start, head.to_string()));
                continue;
            }
            if line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Parse {
                    line: start,
                    message: format!("expected key=value, got {line:?}"),
                });
            };
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                continue;
            }
            let value = props.substitute(value);
            props.set(key, value);
        }

        if let Some((start, _)) = pending {
            return Err(ConfigError::Parse {
                line: start,
                message: "continuation at end of input".to_string(),
            });
        }
        Ok(props)
    }

    fn substitute(&self, value: &str) -> String {
        let mut out = value.to_string();
        let mut from = 0;
        for _ in 0..MAX_SUBSTITUTIONS {
            let Some(start) = out[from..].find("$(").map(|i| i + from) else {
                break;
            };
            let Some(end) = out[start..].find(')').map(|i| i + start) else {
                break;
            };
            let name = &out[start + 2..end];
            let replacement = self
                .get(name)
                .map(str::to_string)
                .or_else(|| std::env::var(name).ok());
            match replacement {
                Some(rep) => {
                    out.replace_range(start..=end, &rep);
                    from = start + rep.len();
                }
                None => from = end + 1,
            }
        }
        out
    }

    /// Insert or override a property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.index.get(&key) {
            Some(&pos) => self.entries[pos].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(|&pos| self.entries[pos].1.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Comma/whitespace separated list value; empty when absent.
    pub fn get_list(&self, key: &str) -> Vec<&str> {
        self.get(key).map(split_list).unwrap_or_default()
    }

    /// Parse a value with `FromStr`; `Ok(None)` when absent.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    /// Parse a boolean (`true/yes/on/1`, `false/no/off/0`, case-insensitive).
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => parse_bool(raw).ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    /// `worker.<name>.<key>`
    pub fn worker_key(name: &str, key: &str) -> String {
        format!("worker.{name}.{key}")
    }

    pub fn worker_get(&self, name: &str, key: &str) -> Option<&str> {
        self.get(&Self::worker_key(name, key))
    }

    /// Whether any `worker.<name>.*` key exists.
    pub fn defines_worker(&self, name: &str) -> bool {
        let prefix = format!("worker.{name}.");
        self.entries.iter().any(|(k, _)| k.starts_with(&prefix))
    }

    /// Names listed in `worker.list`.
    pub fn worker_list(&self) -> Vec<&str> {
        self.get_list("worker.list")
    }

    /// URI mount rules: `/...`, `!/...`, `-/...` keys, then every worker's `mount` key.
    pub fn mounts(&self) -> Vec<Mount> {
        let mut mounts: Vec<Mount> = self
            .entries
            .iter()
            .filter(|(k, _)| is_mount_key(k))
            .map(|(k, v)| Mount {
                pattern: k.clone(),
                worker: v.clone(),
            })
            .collect();

        for (key, value) in &self.entries {
            let Some(worker) = key
                .strip_prefix("worker.")
                .and_then(|rest| rest.strip_suffix(".mount"))
            else {
                continue;
            };
            for pattern in split_list(value) {
                mounts.push(Mount {
                    pattern: pattern.to_string(),
                    worker: worker.to_string(),
                });
            }
        }
        mounts
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn is_mount_key(key: &str) -> bool {
    let key = key.trim_start_matches(['-', '!']);
    key.starts_with('/')
}

/// Split a list value on commas and whitespace.
pub fn split_list(value: &str) -> Vec<&str> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

impl FromStr for Properties {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Properties::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_comments_and_whitespace() {
        let props = Properties::parse(
            "# workers\n\
             worker.list = a, b   # inline comment\n\
             \n\
             worker.a.port=8009\n",
        )
        .unwrap();
        assert_eq!(props.worker_list(), vec!["a", "b"]);
        assert_eq!(props.get_parsed::<u16>("worker.a.port").unwrap(), Some(8009));
        assert_eq!(props.len(), 2);
    }

    #[test]
    fn test_continuation_and_substitution() {
        let props = Properties::parse(
            "base=/opt/app\n\
             worker.list=one,\\\n\
             two\n\
             path=$(base)/logs\n\
             other=$(undefined_key_for_test)/x\n",
        )
        .unwrap();
        assert_eq!(props.worker_list(), vec!["one", "two"]);
        assert_eq!(props.get("path"), Some("/opt/app/logs"));
        assert_eq!(props.get("other"), Some("$(undefined_key_for_test)/x"));
    }

    #[test]
    fn test_later_duplicate_overrides_in_place() {
        let props = Properties::parse("a=1\nb=2\na=3\n").unwrap();
        assert_eq!(props.get("a"), Some("3"));
        let keys: Vec<_> = props.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_equals_reports_line() {
        let err = Properties::parse("a=1\nnot a property\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_typed_accessors() {
        let props = Properties::parse("t=Yes\nf=off\nbad=maybe\nn=abc\n").unwrap();
        assert!(props.get_bool("t", false).unwrap());
        assert!(!props.get_bool("f", true).unwrap());
        assert!(props.get_bool("missing", true).unwrap());
        assert!(props.get_bool("bad", true).is_err());
        assert!(matches!(
            props.get_parsed::<f64>("n"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_mounts_collected_in_order() {
        let props = Properties::parse(
            "/app/*=lb\n\
             !/app/static/*=lb\n\
             -/old/*=legacy\n\
             worker.status.mount=/jkstatus /jkstatus/*\n\
             worker.list=lb\n",
        )
        .unwrap();
        let mounts = props.mounts();
        let patterns: Vec<_> = mounts.iter().map(|m| m.pattern.as_str()).collect();
        assert_eq!(
            patterns,
            vec!["/app/*", "!/app/static/*", "-/old/*", "/jkstatus", "/jkstatus/*"]
        );
        assert_eq!(mounts[3].worker, "status");
    }
}
