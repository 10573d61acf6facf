//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! workers.properties (key=value)
//!     → properties.rs (parse, continuations, $(key) substitution)
//!     → validation.rs (semantic checks, all errors reported)
//!     → schema.rs (typed AjpSettings / LbSettings / MemberSettings)
//!     → worker registry + URI map built from the validated source
//!
//! On mount file change:
//!     watcher.rs detects change
//!     → loader.rs loads the file
//!     → URI map builds the inactive generation
//!     → active index flips; on failure the current rules stay
//! ```
//!
//! # Design Decisions
//! - Properties are immutable once loaded; changes require a reload
//! - Every setting has a default so minimal configs work
//! - Validation separates syntactic (parser) from semantic checks

pub mod loader;
pub mod properties;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_properties, ConfigError};
pub use properties::{Mount, Properties};
pub use schema::{AjpSettings, LbSettings, MemberSettings, WorkerType};
pub use validation::{validate, ValidationError};
pub use watcher::MountWatcher;
