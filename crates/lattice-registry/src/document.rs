//! Registry document parsing.
//!
//! A registry document declares the fleet: one entry per service with its
//! address, health endpoint, timing knobs and declared dependencies. TOML,
//! JSON and YAML sources are supported, selected by file extension.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{HealthProtocol, RetryPolicy, ServiceDescriptor};

/// Probe interval applied when an entry does not set one.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);
/// Request timeout applied when an entry does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Health path applied when an entry does not set one.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Top-level registry document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryDocument {
    pub services: Vec<ServiceEntry>,
}

/// One service entry as written in the document.
///
/// Everything beyond name and address is optional; defaults are applied
/// during validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub health_path: Option<String>,
    pub health_protocol: Option<HealthProtocol>,
    pub interval: Option<String>,
    pub timeout: Option<String>,
    pub max_retries: Option<u32>,
    pub base_delay: Option<String>,
    pub max_delay: Option<String>,
    pub depends_on: Option<Vec<String>>,
}

impl RegistryDocument {
    /// Load a document from a file, dispatching on the extension.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        match format {
            "toml" | "json" | "yaml" | "yml" => {}
            _ => return Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }

        let content = std::fs::read_to_string(path)?;
        match format {
            "toml" => toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string())),
            "json" => {
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            _ => serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string())),
        }
    }

    /// Validate entries and apply defaults, producing typed descriptors
    /// in declared order.
    pub fn into_descriptors(self) -> Result<Vec<ServiceDescriptor>, ConfigError> {
        let mut seen = HashSet::new();
        let mut descriptors = Vec::with_capacity(self.services.len());
        for entry in self.services {
            if !seen.insert(entry.name.clone()) {
                return Err(ConfigError::DuplicateService(entry.name));
            }
            descriptors.push(entry.into_descriptor()?);
        }
        Ok(descriptors)
    }
}

impl ServiceEntry {
    fn into_descriptor(self) -> Result<ServiceDescriptor, ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidField {
                service: self.host.clone(),
                field: "name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidField {
                service: self.name,
                field: "host",
                reason: "must not be empty".to_string(),
            });
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidField {
                service: self.name,
                field: "port",
                reason: "must be nonzero".to_string(),
            });
        }

        let probe_interval =
            entry_duration(&self.name, "interval", self.interval, DEFAULT_PROBE_INTERVAL)?;
        if probe_interval.is_zero() {
            return Err(ConfigError::InvalidField {
                service: self.name,
                field: "interval",
                reason: "must be positive".to_string(),
            });
        }
        let timeout = entry_duration(&self.name, "timeout", self.timeout, DEFAULT_TIMEOUT)?;
        if timeout.is_zero() {
            return Err(ConfigError::InvalidField {
                service: self.name,
                field: "timeout",
                reason: "must be positive".to_string(),
            });
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            base_delay: entry_duration(&self.name, "base_delay", self.base_delay, defaults.base_delay)?,
            max_delay: entry_duration(&self.name, "max_delay", self.max_delay, defaults.max_delay)?,
        };

        Ok(ServiceDescriptor {
            name: self.name,
            host: self.host,
            port: self.port,
            health_path: self
                .health_path
                .unwrap_or_else(|| DEFAULT_HEALTH_PATH.to_string()),
            health_protocol: self.health_protocol.unwrap_or(HealthProtocol::Http),
            probe_interval,
            timeout,
            retry,
            depends_on: self.depends_on.unwrap_or_default(),
        })
    }
}

fn entry_duration(
    service: &str,
    field: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    parse_duration(&raw).ok_or_else(|| ConfigError::InvalidField {
        service: service.to_string(),
        field,
        reason: format!("cannot parse duration {raw:?}"),
    })
}

/// Parse a duration string like "5s", "500ms", "1m".
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
