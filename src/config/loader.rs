//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::properties::Properties;
use crate::config::validation::{validate, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse { line: usize, message: String },
    InvalidRule { pattern: String, reason: String },
    Missing(String),
    InvalidValue { key: String, value: String },
    Validation(Vec<ValidationError>),
    Lifecycle { worker: String, expected: String, found: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse { line, message } => write!(f, "Parse error at line {}: {}", line, message),
            ConfigError::InvalidRule { pattern, reason } => {
                write!(f, "Invalid mount rule {:?}: {}", pattern, reason)
            }
            ConfigError::Missing(key) => write!(f, "Missing required property {}", key),
            ConfigError::InvalidValue { key, value } => write!(f, "Invalid value {:?} for {}", value, key),
            ConfigError::Lifecycle { worker, expected, found } => {
                write!(f, "Worker {} is {}, expected {}", worker, found, expected)
            }
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Read a properties file without semantic checks.
pub fn load_properties(path: &Path) -> Result<Properties, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    Properties::parse(&content)
}

/// Load and validate a connector configuration file.
pub fn load_config(path: &Path) -> Result<Properties, ConfigError> {
    let props = load_properties(path)?;
    validate(&props).map_err(ConfigError::Validation)?;
    Ok(props)
}
