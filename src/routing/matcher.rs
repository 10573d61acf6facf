//! URI rule parsing and matching.
//!
//! # Responsibilities
//! - Parse mount patterns into exact, prefix and suffix rules
//! - Match a URI against one rule
//! - Detect suffix-spoofed URIs (`/ctx/page.jsp.`, `/ctx/page.jsp/x`)
//!
//! # Design Decisions
//! - The match kind is derived once from the literal pattern and never changes
//! - Matching is case-sensitive
//! - No regex: prefix/suffix comparisons only
//! - Supported wildcards are a trailing `/*` and `/*.ext`; anything else is rejected

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::config::loader::ConfigError;

/// Path parameter carrying a session id in URL-rewritten requests.
pub const SESSION_PATH_PARAM: &str = ";jsessionid";

/// How a rule compares against a URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// `/ctx/page` matches only itself.
    Exact,
    /// `/ctx/*` matches anything under `/ctx/`.
    Prefix,
    /// `/ctx/*.ext` matches anything under `/ctx/` ending in `.ext`.
    Suffix,
}

impl MatchKind {
    /// Tie-break weight at equal context length.
    fn rank(self) -> u8 {
        match self {
            MatchKind::Exact => 2,
            MatchKind::Suffix => 1,
            MatchKind::Prefix => 0,
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchKind::Exact => "exact",
            MatchKind::Prefix => "prefix",
            MatchKind::Suffix => "suffix",
        };
        f.write_str(name)
    }
}

/// One compiled mount rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriRule {
    pattern: String,
    kind: MatchKind,
    worker: Arc<str>,
    context: String,
    /// Dotted extension of a suffix rule (`.jsp`).
    extension: Option<String>,
    no_match: bool,
    disabled: bool,
}

impl UriRule {
    /// Parse a single pattern (flags allowed, no `|`).
    pub fn parse(raw: &str, worker: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidRule {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };

        let worker = worker.trim();
        if worker.is_empty() {
            return Err(invalid("empty worker name"));
        }
        if worker.chars().any(char::is_whitespace) {
            return Err(invalid("worker name contains whitespace"));
        }

        let (no_match, disabled, pattern) = split_flags(raw.trim());
        if !pattern.starts_with('/') {
            return Err(invalid("pattern must start with '/'"));
        }
        if pattern.contains('?') {
            return Err(invalid("'?' wildcards are not supported"));
        }

        let (kind, context, extension) = match pattern.find('*') {
            None => (MatchKind::Exact, pattern.to_string(), None),
            Some(star) => {
                if pattern[star + 1..].contains('*') {
                    return Err(invalid("more than one wildcard"));
                }
                if !pattern[..star].ends_with('/') {
                    return Err(invalid("wildcard must follow '/'"));
                }
                let context = pattern[..star].to_string();
                let rest = &pattern[star + 1..];
                if rest.is_empty() {
                    (MatchKind::Prefix, context, None)
                } else {
                    let Some(ext) = rest.strip_prefix('.') else {
                        return Err(invalid("wildcard must be '/*' or '/*.ext'"));
                    };
                    if ext.is_empty() {
                        return Err(invalid("empty suffix after '*.'"));
                    }
                    if ext.contains('/') {
                        return Err(invalid("suffix contains '/'"));
                    }
                    (MatchKind::Suffix, context, Some(format!(".{ext}")))
                }
            }
        };

        Ok(Self {
            pattern: pattern.to_string(),
            kind,
            worker: Arc::from(worker),
            context,
            extension,
            no_match,
            disabled,
        })
    }

    /// The pattern without `-`/`!` flags.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn kind(&self) -> MatchKind {
        self.kind
    }

    pub fn worker(&self) -> &Arc<str> {
        &self.worker
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Length of the literal text before any wildcard.
    pub fn context_len(&self) -> usize {
        self.context.len()
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// An exclusion (`!`) rule.
    pub fn is_no_match(&self) -> bool {
        self.no_match
    }

    /// A disabled (`-`) rule.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Whether `uri` satisfies this rule's pattern, ignoring flags.
    pub fn matches(&self, uri: &str) -> bool {
        match self.kind {
            MatchKind::Exact => uri == self.context,
            MatchKind::Prefix => uri.starts_with(&self.context),
            MatchKind::Suffix => {
                let ext = self.extension.as_deref().unwrap_or_default();
                uri.len() >= self.context.len() + ext.len()
                    && uri.starts_with(&self.context)
                    && uri.ends_with(ext)
            }
        }
    }

    /// Whether `uri` hides this rule's suffix behind a trailing `.`, `/` or space.
    ///
    /// Only suffix rules can be spoofed. The context must match as well.
    pub fn fraud_match(&self, uri: &str) -> bool {
        let (MatchKind::Suffix, Some(ext)) = (self.kind, self.extension.as_deref()) else {
            return false;
        };
        if !uri.starts_with(&self.context) {
            return false;
        }
        uri.match_indices(ext).any(|(at, _)| {
            matches!(uri.as_bytes().get(at + ext.len()).copied(), Some(b'.' | b'/' | b' '))
        })
    }

    /// Ordering used by the rule table: longest context first, then
    /// exact before suffix before prefix, then pattern text for stability.
    pub fn priority_cmp(&self, other: &Self) -> Ordering {
        other
            .context_len()
            .cmp(&self.context_len())
            .then_with(|| other.kind.rank().cmp(&self.kind.rank()))
            .then_with(|| self.pattern.cmp(&other.pattern))
    }
}

impl fmt::Display for UriRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.disabled {
            f.write_str("-")?;
        }
        if self.no_match {
            f.write_str("!")?;
        }
        write!(f, "{}={}", self.pattern, self.worker)
    }
}

/// Strip leading `-` (disabled) and `!` (no-match) flags in any order.
fn split_flags(raw: &str) -> (bool, bool, &str) {
    let mut no_match = false;
    let mut disabled = false;
    let mut rest = raw;
    loop {
        if let Some(r) = rest.strip_prefix('!') {
            no_match = true;
            rest = r;
        } else if let Some(r) = rest.strip_prefix('-') {
            disabled = true;
            rest = r;
        } else {
            return (no_match, disabled, rest);
        }
    }
}

/// Parse a mount, expanding `/ctx|/*` into `/ctx` and `/ctx/*`.
pub fn parse_mount(raw: &str, worker: &str) -> Result<Vec<UriRule>, ConfigError> {
    let raw = raw.trim();
    match raw.split_once('|') {
        None => Ok(vec![UriRule::parse(raw, worker)?]),
        Some((base, tail)) => {
            if tail.contains('|') {
                return Err(ConfigError::InvalidRule {
                    pattern: raw.to_string(),
                    reason: "more than one '|'".to_string(),
                });
            }
            let (no_match, disabled, base_path) = split_flags(base);
            let flags = format!(
                "{}{}",
                if disabled { "-" } else { "" },
                if no_match { "!" } else { "" }
            );
            let base_path = base_path.trim_end_matches('/');
            let first = UriRule::parse(base, worker)?;
            let second = UriRule::parse(&format!("{flags}{base_path}{tail}"), worker)?;
            Ok(vec![first, second])
        }
    }
}

/// Remove a `;jsessionid=...` path parameter, up to the next `/` or end.
pub fn strip_session_marker(uri: &str) -> Cow<'_, str> {
    let Some(start) = uri.find(SESSION_PATH_PARAM) else {
        return Cow::Borrowed(uri);
    };
    let end = uri[start..]
        .find('/')
        .map(|i| start + i)
        .unwrap_or(uri.len());
    let mut stripped = String::with_capacity(uri.len() - (end - start));
    stripped.push_str(&uri[..start]);
    stripped.push_str(&uri[end..]);
    Cow::Owned(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str) -> UriRule {
        UriRule::parse(pattern, "w").unwrap()
    }

    #[test]
    fn test_parse_kinds() {
        let exact = rule("/login/j_security_check");
        assert_eq!(exact.kind(), MatchKind::Exact);
        assert_eq!(exact.context_len(), "/login/j_security_check".len());

        let prefix = rule("/app/*");
        assert_eq!(prefix.kind(), MatchKind::Prefix);
        assert_eq!(prefix.context(), "/app/");

        let suffix = rule("/app/*.jsp");
        assert_eq!(suffix.kind(), MatchKind::Suffix);
        assert_eq!(suffix.context(), "/app/");
        assert_eq!(suffix.extension(), Some(".jsp"));

        let root = rule("/*.do");
        assert_eq!(root.context(), "/");
    }

    #[test]
    fn test_parse_flags() {
        let r = UriRule::parse("!/app/static/*", "w").unwrap();
        assert!(r.is_no_match());
        assert!(!r.is_disabled());
        let r = UriRule::parse("-/old/*", "w").unwrap();
        assert!(r.is_disabled());
        assert_eq!(r.pattern(), "/old/*");
        assert_eq!(r.to_string(), "-/old/*=w");
    }

    #[test]
    fn test_malformed_patterns_rejected() {
        for bad in ["app/*", "/app*", "/app/*/x", "/a/*/*", "/app/*.", "/app/*x", "/app/?.jsp"] {
            assert!(
                matches!(UriRule::parse(bad, "w"), Err(ConfigError::InvalidRule { .. })),
                "{bad} should be rejected"
            );
        }
        assert!(UriRule::parse("/app/*", " ").is_err());
    }

    #[test]
    fn test_matches() {
        assert!(rule("/app/index.jsp").matches("/app/index.jsp"));
        assert!(!rule("/app/index.jsp").matches("/app/index.jsp/"));

        assert!(rule("/app/*").matches("/app/"));
        assert!(rule("/app/*").matches("/app/a/b"));
        assert!(!rule("/app/*").matches("/app"));
        assert!(!rule("/app/*").matches("/application"));

        assert!(rule("/app/*.jsp").matches("/app/x/y.jsp"));
        assert!(!rule("/app/*.jsp").matches("/app/y.jspx"));
        assert!(!rule("/app/*.jsp").matches("/other/y.jsp"));
    }

    #[test]
    fn test_fraud_match() {
        let r = rule("/app/*.jsp");
        assert!(r.fraud_match("/app/secret.jsp."));
        assert!(r.fraud_match("/app/secret.jsp/x"));
        assert!(r.fraud_match("/app/secret.jsp "));
        assert!(r.fraud_match("/app/a.jsp.bak"));
        assert!(!r.fraud_match("/app/secret.jsp"));
        assert!(!r.fraud_match("/app/secret.jspx/"));
        assert!(!r.fraud_match("/other/secret.jsp."));
        assert!(!rule("/app/*").fraud_match("/app/secret.jsp."));
    }

    #[test]
    fn test_priority_order() {
        let mut rules = vec![rule("/app/*"), rule("/app/*.jsp"), rule("/app/admin/*"), rule("/app/")];
        rules.sort_by(UriRule::priority_cmp);
        let order: Vec<_> = rules.iter().map(|r| r.pattern()).collect();
        assert_eq!(order, vec!["/app/admin/*", "/app/", "/app/*.jsp", "/app/*"]);
    }

    #[test]
    fn test_dual_mount() {
        let rules = parse_mount("/examples|/*", "w").unwrap();
        let patterns: Vec<_> = rules.iter().map(|r| r.pattern()).collect();
        assert_eq!(patterns, vec!["/examples", "/examples/*"]);

        let rules = parse_mount("!/docs|/*.pdf", "w").unwrap();
        assert!(rules.iter().all(|r| r.is_no_match()));
        assert_eq!(rules[1].pattern(), "/docs/*.pdf");
    }

    #[test]
    fn test_strip_session_marker() {
        assert_eq!(strip_session_marker("/app/a.jsp;jsessionid=ABC.node1"), "/app/a.jsp");
        assert_eq!(strip_session_marker("/app;jsessionid=ABC/a.jsp"), "/app/a.jsp");
        assert!(matches!(strip_session_marker("/app/a.jsp"), Cow::Borrowed(_)));
    }
}
