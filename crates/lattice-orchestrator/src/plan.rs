//! Run-state types for an orchestration pass.

use serde::Serialize;
use std::fmt;

use lattice_registry::ServiceName;

/// Where a service sits during a startup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServicePhase {
    /// Not reached yet.
    Pending,
    /// Blocking on declared dependencies turning healthy.
    WaitingDeps,
    /// Start hook invoked, waiting for the first healthy probe.
    Starting,
    /// Up and probed healthy.
    Healthy,
    /// Gave up; see the recorded [`FailureReason`].
    Failed,
}

impl fmt::Display for ServicePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServicePhase::Pending => "pending",
            ServicePhase::WaitingDeps => "waiting_deps",
            ServicePhase::Starting => "starting",
            ServicePhase::Healthy => "healthy",
            ServicePhase::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Why a service was marked failed during startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// A declared dependency never probed healthy within the wait.
    DependencyUnhealthy { dependency: ServiceName },
    /// A declared dependency failed earlier in the run; this service
    /// was never attempted.
    DependencyFailed { dependency: ServiceName },
    /// The external start hook returned an error.
    StartHook { message: String },
    /// Started, but no healthy probe arrived within the startup window.
    StartupTimeout,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::DependencyUnhealthy { dependency } => {
                write!(f, "dependency {dependency} never became healthy")
            }
            FailureReason::DependencyFailed { dependency } => {
                write!(f, "dependency {dependency} failed to start")
            }
            FailureReason::StartHook { message } => {
                write!(f, "start hook failed: {message}")
            }
            FailureReason::StartupTimeout => {
                write!(f, "no healthy probe within the startup window")
            }
        }
    }
}

/// One failed service and the reason it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartFailure {
    pub service: ServiceName,
    pub reason: FailureReason,
}

/// Outcome of a startup run.
#[derive(Debug, Clone, Default)]
pub struct StartSummary {
    /// Services that reached [`ServicePhase::Healthy`], in start order.
    pub started: Vec<ServiceName>,
    /// Services that did not, each with its blocking reason.
    pub failed: Vec<StartFailure>,
}

impl StartSummary {
    pub fn all_started(&self) -> bool {
        self.failed.is_empty()
    }

    /// The recorded reason for one service, if it failed.
    pub fn failure_of(&self, service: &str) -> Option<&FailureReason> {
        self.failed
            .iter()
            .find(|f| f.service == service)
            .map(|f| &f.reason)
    }
}

/// Outcome of a shutdown run. Stop hook errors are collected, not
/// escalated.
#[derive(Debug, Clone, Default)]
pub struct StopSummary {
    /// Services whose stop hook completed, in stop order.
    pub stopped: Vec<ServiceName>,
    /// Stop hooks that errored, with the message.
    pub errors: Vec<(ServiceName, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reasons_name_the_blocker() {
        let reason = FailureReason::DependencyUnhealthy {
            dependency: "influxdb".to_string(),
        };
        assert_eq!(reason.to_string(), "dependency influxdb never became healthy");

        let reason = FailureReason::DependencyFailed {
            dependency: "prometheus".to_string(),
        };
        assert_eq!(reason.to_string(), "dependency prometheus failed to start");
    }

    #[test]
    fn summary_lookup_by_service() {
        let summary = StartSummary {
            started: vec!["db".to_string()],
            failed: vec![StartFailure {
                service: "api".to_string(),
                reason: FailureReason::StartupTimeout,
            }],
        };
        assert!(!summary.all_started());
        assert_eq!(
            summary.failure_of("api"),
            Some(&FailureReason::StartupTimeout)
        );
        assert_eq!(summary.failure_of("db"), None);
    }
}
