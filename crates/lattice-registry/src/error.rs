//! Registry error types.

use thiserror::Error;

/// Errors raised while loading or validating a registry document.
///
/// All of these are fatal at load time: the process must not come up
/// with a partial or cyclic service graph.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read registry source: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed registry document: {0}")]
    Parse(String),

    #[error("unsupported registry format: {0} (expected .toml, .json, .yaml or .yml)")]
    UnsupportedFormat(String),

    #[error("duplicate service definition: {0}")]
    DuplicateService(String),

    #[error("service {service} depends on undefined service {dependency}")]
    UnknownDependency { service: String, dependency: String },

    #[error("service {0} depends on itself")]
    SelfDependency(String),

    #[error("dependency cycle detected: {}", members.join(" -> "))]
    DependencyCycle { members: Vec<String> },

    #[error("invalid {field} for service {service}: {reason}")]
    InvalidField {
        service: String,
        field: &'static str,
        reason: String,
    },
}

/// Lookup failure for a name that is not in the registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("service not found: {0}")]
pub struct ServiceNotFound(pub String);
