//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Request path (normalized by the adapter)
//!     → router.rs (strip ;jsessionid, load active generation)
//!     → matcher.rs (exact / prefix / suffix rules, priority order)
//!     → router.rs (exclusion rules, suffix-spoofing guard)
//!     → Return: worker name or no match
//!
//! Rule Compilation (startup and reload):
//!     Mount[] (pattern=worker)
//!     → Parse flags (-, !) and dual mounts (|)
//!     → Sort by context length, then exact > suffix > prefix
//!     → Store into the inactive slot, flip the active index
//! ```
//!
//! # Design Decisions
//! - Rules compiled at load, immutable at runtime
//! - No regex in hot path (prefix/suffix matching only)
//! - Deterministic: same input always matches same rule
//! - First match in priority order wins

pub mod matcher;
pub mod router;

pub use matcher::{MatchKind, UriRule};
pub use router::{Resolution, RuleTable, UriWorkerMap};
