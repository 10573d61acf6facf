//! URI-to-worker map with double-buffered hot reload.
//!
//! # Responsibilities
//! - Hold compiled rule tables in two generation slots
//! - Resolve a request path to a worker name
//! - Apply exclusion rules and the suffix-spoofing guard
//! - Rebuild and swap the rule table on reload
//!
//! # Design Decisions
//! - Readers never block: one atomic index load, one `ArcSwap` load
//! - A reload builds into the inactive slot, then flips the index
//! - A failed reload leaves the active generation untouched
//! - The session path parameter is stripped before any matching; the fraud
//!   scan runs last on the same stripped, already-normalized path

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::config::loader::ConfigError;
use crate::config::properties::{Mount, Properties};
use crate::observability::logging::AUDIT_TARGET;
use crate::observability::metrics;
use crate::routing::matcher::{parse_mount, strip_session_marker, MatchKind, UriRule};

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub worker: Arc<str>,
    pub kind: MatchKind,
    pub context_len: usize,
    /// Matched only through the suffix-spoofing guard.
    pub fraud: bool,
}

/// One immutable generation of compiled rules.
#[derive(Debug, Default)]
pub struct RuleTable {
    generation: u64,
    /// Active rules in priority order.
    rules: Vec<UriRule>,
    /// Enabled `!` rules.
    exclusions: Vec<UriRule>,
    /// Every rule as registered, disabled ones included.
    all: Vec<UriRule>,
}

impl RuleTable {
    /// Compile mounts in order. A duplicate pattern replaces the earlier rule.
    pub fn build(mounts: &[Mount], generation: u64) -> Result<Self, ConfigError> {
        let mut all: Vec<UriRule> = Vec::new();
        for mount in mounts {
            for rule in parse_mount(&mount.pattern, &mount.worker)? {
                let existing = all
                    .iter_mut()
                    .find(|r| r.pattern() == rule.pattern() && r.is_no_match() == rule.is_no_match());
                match existing {
                    Some(slot) => {
                        tracing::debug!(rule = %rule, previous = %slot, "Replacing mount rule");
                        *slot = rule;
                    }
                    None => all.push(rule),
                }
            }
        }

        let mut rules: Vec<UriRule> = all
            .iter()
            .filter(|r| !r.is_disabled() && !r.is_no_match())
            .cloned()
            .collect();
        rules.sort_by(UriRule::priority_cmp);

        let exclusions = all
            .iter()
            .filter(|r| !r.is_disabled() && r.is_no_match())
            .cloned()
            .collect();

        Ok(Self {
            generation,
            rules,
            exclusions,
            all,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Active rules in match order.
    pub fn rules(&self) -> &[UriRule] {
        &self.rules
    }

    /// All registered rules, including disabled and exclusion rules.
    pub fn all_rules(&self) -> &[UriRule] {
        &self.all
    }

    /// Worker names referenced by any rule.
    pub fn workers(&self) -> impl Iterator<Item = &str> {
        self.all.iter().map(|r| &**r.worker())
    }

    fn is_excluded(&self, uri: &str, worker: &str) -> bool {
        self.exclusions
            .iter()
            .any(|r| &**r.worker() == worker && r.matches(uri))
    }

    /// Resolve `uri` against this generation.
    pub fn resolve(&self, uri: &str) -> Option<Resolution> {
        if !uri.starts_with('/') {
            tracing::debug!(uri = %uri, "URI does not start with '/', not mapped");
            return None;
        }
        let uri = strip_session_marker(uri);

        let (rule, fraud) = match self.rules.iter().find(|r| r.matches(&uri)) {
            Some(rule) => (rule, false),
            None => (self.rules.iter().find(|r| r.fraud_match(&uri))?, true),
        };

        if self.is_excluded(&uri, rule.worker()) {
            tracing::debug!(uri = %uri, worker = %rule.worker(), "Match denied by exclusion rule");
            return None;
        }

        if fraud {
            tracing::warn!(
                target: AUDIT_TARGET,
                uri = %uri,
                worker = %rule.worker(),
                rule = %rule.pattern(),
                "Suffix-spoofing attempt routed to protected worker"
            );
            metrics::record_fraud_attempt(rule.worker());
        } else {
            tracing::debug!(uri = %uri, worker = %rule.worker(), rule = %rule.pattern(), kind = %rule.kind(), "URI mapped");
        }

        Some(Resolution {
            worker: Arc::clone(rule.worker()),
            kind: rule.kind(),
            context_len: rule.context_len(),
            fraud,
        })
    }
}

/// Maps request paths to worker names.
pub struct UriWorkerMap {
    slots: [ArcSwap<RuleTable>; 2],
    active: AtomicUsize,
    reload_lock: Mutex<()>,
}

impl UriWorkerMap {
    /// Build a map whose first generation holds `mounts`.
    pub fn new(mounts: &[Mount]) -> Result<Self, ConfigError> {
        let table = RuleTable::build(mounts, 1)?;
        tracing::info!(rules = table.rules.len(), "URI map initialized");
        Ok(Self {
            slots: [
                ArcSwap::from_pointee(table),
                ArcSwap::from_pointee(RuleTable::default()),
            ],
            active: AtomicUsize::new(0),
            reload_lock: Mutex::new(()),
        })
    }

    /// Build from every mount in a properties source.
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        Self::new(&props.mounts())
    }

    /// The active rule table.
    pub fn table(&self) -> Arc<RuleTable> {
        let idx = self.active.load(Ordering::Acquire);
        self.slots[idx].load_full()
    }

    pub fn generation(&self) -> u64 {
        self.table().generation()
    }

    /// Resolve `uri` to a worker; `None` when unmapped.
    pub fn resolve(&self, uri: &str) -> Option<Resolution> {
        let idx = self.active.load(Ordering::Acquire);
        self.slots[idx].load().resolve(uri)
    }

    /// Resolve `uri` to a worker name only.
    pub fn resolve_worker(&self, uri: &str) -> Option<Arc<str>> {
        self.resolve(uri).map(|r| r.worker)
    }

    /// Replace the rules with `mounts`; returns the new generation.
    ///
    /// On error nothing changes and in-flight resolutions are unaffected.
    pub fn reload(&self, mounts: &[Mount]) -> Result<u64, ConfigError> {
        let _guard = self
            .reload_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let current = self.active.load(Ordering::Acquire);
        let next = 1 - current;
        let generation = self.slots[current].load().generation() + 1;

        let table = match RuleTable::build(mounts, generation) {
            Ok(table) => table,
            Err(e) => {
                tracing::error!(error = %e, generation = generation - 1, "URI map reload failed, keeping current rules");
                return Err(e);
            }
        };
        let rules = table.rules.len();

        self.slots[next].store(Arc::new(table));
        self.active.store(next, Ordering::Release);

        tracing::info!(generation, rules, "URI map reloaded");
        Ok(generation)
    }
}

impl std::fmt::Debug for UriWorkerMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table();
        f.debug_struct("UriWorkerMap")
            .field("generation", &table.generation())
            .field("rules", &table.rules().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mounts(pairs: &[(&str, &str)]) -> Vec<Mount> {
        pairs
            .iter()
            .map(|(p, w)| Mount {
                pattern: p.to_string(),
                worker: w.to_string(),
            })
            .collect()
    }

    fn worker(map: &UriWorkerMap, uri: &str) -> Option<String> {
        map.resolve_worker(uri).map(|w| w.to_string())
    }

    #[test]
    fn test_longest_context_wins() {
        let map = UriWorkerMap::new(&mounts(&[
            ("/*", "root"),
            ("/app/*", "app"),
            ("/app/admin/*", "admin"),
            ("/app/admin/login", "login"),
        ]))
        .unwrap();

        assert_eq!(worker(&map, "/index.html").as_deref(), Some("root"));
        assert_eq!(worker(&map, "/app/list").as_deref(), Some("app"));
        assert_eq!(worker(&map, "/app/admin/users").as_deref(), Some("admin"));
        assert_eq!(worker(&map, "/app/admin/login").as_deref(), Some("login"));
    }

    #[test]
    fn test_suffix_beats_prefix_at_equal_context() {
        let map = UriWorkerMap::new(&mounts(&[("/app/*", "static"), ("/app/*.jsp", "jsp")])).unwrap();
        let res = map.resolve("/app/page.jsp").unwrap();
        assert_eq!(&*res.worker, "jsp");
        assert_eq!(res.kind, MatchKind::Suffix);
        assert_eq!(worker(&map, "/app/style.css").as_deref(), Some("static"));
    }

    #[test]
    fn test_longer_prefix_beats_shorter_suffix() {
        let map = UriWorkerMap::new(&mounts(&[("/*.jsp", "jsp"), ("/app/*", "app")])).unwrap();
        assert_eq!(worker(&map, "/app/page.jsp").as_deref(), Some("app"));
        assert_eq!(worker(&map, "/other/page.jsp").as_deref(), Some("jsp"));
    }

    #[test]
    fn test_session_marker_ignored() {
        let map = UriWorkerMap::new(&mounts(&[("/app/*.jsp", "jsp"), ("/app/login", "login")])).unwrap();
        for uri in ["/app/page.jsp", "/app/login", "/app/nothing"] {
            let decorated = format!("{uri};jsessionid=0123ABCD.node1");
            assert_eq!(map.resolve(uri), map.resolve(&decorated), "{uri}");
        }
        assert_eq!(worker(&map, "/app/login;jsessionid=X").as_deref(), Some("login"));
    }

    #[test]
    fn test_fraud_guard_routes_to_protected_worker() {
        let map = UriWorkerMap::new(&mounts(&[("/app/*.jsp", "jsp")])).unwrap();

        let res = map.resolve("/app/secret.jsp.").unwrap();
        assert_eq!(&*res.worker, "jsp");
        assert!(res.fraud);

        assert!(map.resolve("/app/secret.jsp/x").unwrap().fraud);
        assert!(!map.resolve("/app/secret.jsp").unwrap().fraud);
        assert!(map.resolve("/app/secret.txt").is_none());
    }

    #[test]
    fn test_fraud_guard_skipped_when_rule_matches() {
        let map = UriWorkerMap::new(&mounts(&[("/app/*.jsp", "jsp"), ("/app/*", "static")])).unwrap();
        let res = map.resolve("/app/secret.jsp.").unwrap();
        assert_eq!(&*res.worker, "static");
        assert!(!res.fraud);
    }

    #[test]
    fn test_exclusion_and_disabled_rules() {
        let map = UriWorkerMap::new(&mounts(&[
            ("/app/*", "app"),
            ("!/app/static/*", "app"),
            ("-/legacy/*", "old"),
        ]))
        .unwrap();
        assert_eq!(worker(&map, "/app/page").as_deref(), Some("app"));
        assert_eq!(worker(&map, "/app/static/logo.png"), None);
        assert_eq!(worker(&map, "/legacy/x"), None);
        assert_eq!(map.table().all_rules().len(), 3);
    }

    #[test]
    fn test_duplicate_pattern_last_wins() {
        let map = UriWorkerMap::new(&mounts(&[("/app/*", "a"), ("/app/*", "b")])).unwrap();
        assert_eq!(worker(&map, "/app/x").as_deref(), Some("b"));
        assert_eq!(map.table().rules().len(), 1);
    }

    #[test]
    fn test_relative_uri_unmapped() {
        let map = UriWorkerMap::new(&mounts(&[("/*", "root")])).unwrap();
        assert_eq!(worker(&map, "app/x"), None);
    }

    #[test]
    fn test_reload_swaps_generation() {
        let map = UriWorkerMap::new(&mounts(&[("/app/*", "a")])).unwrap();
        let before = map.table();
        assert_eq!(before.generation(), 1);

        let generation = map.reload(&mounts(&[("/app/*", "b"), ("/shop/*", "c")])).unwrap();
        assert_eq!(generation, 2);
        assert_eq!(worker(&map, "/app/x").as_deref(), Some("b"));
        assert_eq!(worker(&map, "/shop/x").as_deref(), Some("c"));

        // A reader holding the old generation still sees it intact.
        assert_eq!(before.resolve("/app/x").map(|r| r.worker.to_string()).as_deref(), Some("a"));

        map.reload(&mounts(&[("/x/*", "x")])).unwrap();
        assert_eq!(map.generation(), 3);
        assert_eq!(worker(&map, "/app/x"), None);
    }

    #[test]
    fn test_failed_reload_keeps_active_rules() {
        let map = UriWorkerMap::new(&mounts(&[("/app/*", "a")])).unwrap();
        let err = map.reload(&mounts(&[("/ok/*", "b"), ("/bad*", "c")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRule { .. }));
        assert_eq!(map.generation(), 1);
        assert_eq!(worker(&map, "/app/x").as_deref(), Some("a"));
        assert_eq!(worker(&map, "/ok/x"), None);
    }

    #[test]
    fn test_concurrent_resolve_during_reload() {
        let map = Arc::new(UriWorkerMap::new(&mounts(&[("/app/*", "a")])).unwrap());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let map = Arc::clone(&map);
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        let w = map.resolve_worker("/app/x").unwrap();
                        assert!(&*w == "a" || &*w == "b");
                    }
                })
            })
            .collect();

        for i in 0..50 {
            let target = if i % 2 == 0 { "b" } else { "a" };
            map.reload(&mounts(&[("/app/*", target)])).unwrap();
        }
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(map.generation(), 51);
    }
}
