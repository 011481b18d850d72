//! Domain types shared across the mesh.
//!
//! These types form the vocabulary the other crates speak: service
//! descriptors (the catalog entries), health verdicts, communication
//! edges, and call-outcome classes. Descriptors are built once at
//! registry load and never mutated afterwards.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unique name of a registered service.
pub type ServiceName = String;

// ── Service descriptor ─────────────────────────────────────────────

/// Immutable catalog entry for one registered service.
///
/// Created when a registry snapshot is loaded; a reload produces a
/// fresh set of descriptors rather than mutating existing ones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceDescriptor {
    pub name: ServiceName,
    pub host: String,
    pub port: u16,
    /// HTTP path probed by the health monitor (e.g. "/health").
    pub health_path: String,
    /// How the health monitor reaches the service.
    pub health_protocol: HealthProtocol,
    /// Interval between health probes.
    #[serde(with = "duration_secs")]
    pub probe_interval: Duration,
    /// Per-attempt request timeout (dispatch and probes).
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Retry behavior for outbound calls to this service.
    pub retry: RetryPolicy,
    /// Names of services that must be healthy before this one starts.
    pub depends_on: Vec<ServiceName>,
}

impl ServiceDescriptor {
    /// `host:port` address of the service.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Probe flavor for a service's health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthProtocol {
    /// Plain HTTP GET to `health_path`; 2xx is healthy.
    Http,
    /// Bare TCP connect; an accepted connection is healthy.
    Tcp,
}

/// Retry behavior for outbound calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt).
    pub max_retries: u32,
    /// Backoff before the first retry; doubles per retry.
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    /// Upper bound on any single backoff sleep.
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

// ── Health ─────────────────────────────────────────────────────────

/// Last-known health verdict for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthVerdict {
    Healthy,
    Unhealthy,
    /// Never probed. Treated as unhealthy by callers (fail-closed).
    Unknown,
}

impl HealthVerdict {
    /// Whether the verdict counts as healthy for gating decisions.
    pub fn is_healthy(self) -> bool {
        self == HealthVerdict::Healthy
    }
}

impl fmt::Display for HealthVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthVerdict::Healthy => write!(f, "healthy"),
            HealthVerdict::Unhealthy => write!(f, "unhealthy"),
            HealthVerdict::Unknown => write!(f, "unknown"),
        }
    }
}

// ── Communication edges ────────────────────────────────────────────

/// A communication edge: who calls whom.
///
/// Breaker state and telemetry windows are keyed by edge. When the
/// embedding process has no identity of its own the caller is `None`
/// and the edge degenerates to "anything -> callee".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    pub caller: Option<ServiceName>,
    pub callee: ServiceName,
}

impl Edge {
    /// Edge to a callee with no caller identity.
    pub fn to(callee: impl Into<ServiceName>) -> Self {
        Self {
            caller: None,
            callee: callee.into(),
        }
    }

    /// Edge between a named caller and callee.
    pub fn between(caller: impl Into<ServiceName>, callee: impl Into<ServiceName>) -> Self {
        Self {
            caller: Some(caller.into()),
            callee: callee.into(),
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.caller {
            Some(caller) => write!(f, "{caller}->{}", self.callee),
            None => write!(f, "{}", self.callee),
        }
    }
}

// ── Call outcomes ──────────────────────────────────────────────────

/// Classification of a failed call, carried on request records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The per-attempt timeout elapsed.
    Timeout,
    /// Connection could not be established (refused, unreachable).
    Connect,
    /// The connection broke or the response was malformed.
    Protocol,
    /// The service answered with a 5xx status.
    Server,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Timeout => write!(f, "timeout"),
            ErrorClass::Connect => write!(f, "connect"),
            ErrorClass::Protocol => write!(f, "protocol"),
            ErrorClass::Server => write!(f, "server"),
        }
    }
}

// ── Serde helpers ──────────────────────────────────────────────────

mod duration_secs {
    use super::*;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

mod duration_millis {
    use super::*;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
