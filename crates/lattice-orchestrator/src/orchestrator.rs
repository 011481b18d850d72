//! Orchestrator — walks the dependency graph to start and stop services.
//!
//! Startup visits services in topological order and holds each one
//! until every declared dependency has probed healthy at least once.
//! A dependency that never turns healthy fails its dependents down
//! the graph without their hooks ever firing. Shutdown runs the same
//! order in reverse so nothing loses a dependency it still needs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use lattice_health::HealthBoard;
use lattice_registry::{ServiceDescriptor, ServiceName, ServiceNotFound, SharedRegistry};

use crate::plan::{FailureReason, ServicePhase, StartFailure, StartSummary, StopSummary};

/// Error surfaced by an external lifecycle hook.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HookError {
    pub message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// External start/stop hooks, supplied by the embedder.
///
/// The orchestrator decides order and timing; the hooks do the actual
/// work (spawn a process, call a cloud API, flip a gate). Hooks are
/// invoked once per service per run.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn start(&self, service: &ServiceDescriptor) -> Result<(), HookError>;
    async fn stop(&self, service: &ServiceDescriptor) -> Result<(), HookError>;
}

/// Bounds on the waits a startup run performs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long a service waits for each declared dependency to probe
    /// healthy before giving up on it.
    pub dependency_wait: Duration,
    /// How long a started service gets to probe healthy.
    pub startup_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dependency_wait: Duration::from_secs(45),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

/// Failures from [`Orchestrator::restart`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    NotFound(#[from] ServiceNotFound),
    #[error("start hook for {service} failed: {source}")]
    StartHook {
        service: ServiceName,
        #[source]
        source: HookError,
    },
    #[error("{service} did not probe healthy after restart")]
    NotHealthy { service: ServiceName },
}

/// Drives dependency-ordered startup and shutdown over the current
/// registry snapshot.
pub struct Orchestrator {
    registry: SharedRegistry,
    health: HealthBoard,
    lifecycle: Arc<dyn Lifecycle>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        registry: SharedRegistry,
        health: HealthBoard,
        lifecycle: Arc<dyn Lifecycle>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            health,
            lifecycle,
            config,
        }
    }

    /// Start every service in dependency order.
    ///
    /// Never aborts the run: a failure marks the service and cascades
    /// to its dependents, while independent branches keep going.
    pub async fn start_all(&self) -> StartSummary {
        let snapshot = self.registry.current();
        info!(services = snapshot.len(), "startup run beginning");

        let mut phases: HashMap<ServiceName, ServicePhase> = snapshot
            .names()
            .map(|n| (n.clone(), ServicePhase::Pending))
            .collect();
        let mut summary = StartSummary::default();

        for name in snapshot.start_order() {
            if let Some(dependency) = snapshot
                .dependencies_of(name)
                .iter()
                .find(|dep| phases.get(dep.as_str()) == Some(&ServicePhase::Failed))
            {
                warn!(service = %name, dependency = %dependency, "skipping start, dependency already failed");
                phases.insert(name.clone(), ServicePhase::Failed);
                summary.failed.push(StartFailure {
                    service: name.clone(),
                    reason: FailureReason::DependencyFailed {
                        dependency: dependency.clone(),
                    },
                });
                continue;
            }

            phases.insert(name.clone(), ServicePhase::WaitingDeps);
            let mut blocked = None;
            for dependency in snapshot.dependencies_of(name) {
                if !self
                    .health
                    .wait_until_healthy(dependency, self.config.dependency_wait)
                    .await
                {
                    blocked = Some(dependency.clone());
                    break;
                }
            }
            if let Some(dependency) = blocked {
                warn!(service = %name, dependency = %dependency, "dependency never probed healthy, not starting");
                phases.insert(name.clone(), ServicePhase::Failed);
                summary.failed.push(StartFailure {
                    service: name.clone(),
                    reason: FailureReason::DependencyUnhealthy { dependency },
                });
                continue;
            }

            let descriptor = match snapshot.get(name) {
                Some(d) => d,
                None => continue,
            };
            phases.insert(name.clone(), ServicePhase::Starting);
            info!(service = %name, "starting service");
            if let Err(err) = self.lifecycle.start(descriptor).await {
                warn!(service = %name, error = %err, "start hook failed");
                phases.insert(name.clone(), ServicePhase::Failed);
                summary.failed.push(StartFailure {
                    service: name.clone(),
                    reason: FailureReason::StartHook {
                        message: err.to_string(),
                    },
                });
                continue;
            }

            if self
                .health
                .wait_until_healthy(name, self.config.startup_timeout)
                .await
            {
                info!(service = %name, "service healthy");
                phases.insert(name.clone(), ServicePhase::Healthy);
                summary.started.push(name.clone());
            } else {
                warn!(service = %name, "started but never probed healthy");
                phases.insert(name.clone(), ServicePhase::Failed);
                summary.failed.push(StartFailure {
                    service: name.clone(),
                    reason: FailureReason::StartupTimeout,
                });
            }
        }

        info!(
            started = summary.started.len(),
            failed = summary.failed.len(),
            "startup run finished"
        );
        summary
    }

    /// Stop every service, dependents before their dependencies.
    ///
    /// Stop hook errors are collected in the summary; the run always
    /// visits every service.
    pub async fn stop_all(&self) -> StopSummary {
        let snapshot = self.registry.current();
        info!(services = snapshot.len(), "shutdown run beginning");

        let mut summary = StopSummary::default();
        for name in snapshot.stop_order() {
            let descriptor = match snapshot.get(&name) {
                Some(d) => d,
                None => continue,
            };
            match self.lifecycle.stop(descriptor).await {
                Ok(()) => {
                    info!(service = %name, "service stopped");
                    summary.stopped.push(name);
                }
                Err(err) => {
                    warn!(service = %name, error = %err, "stop hook failed");
                    summary.errors.push((name, err.message));
                }
            }
        }
        summary
    }

    /// Stop one service, start it again, and wait for a healthy probe.
    ///
    /// A stop hook error is logged and ignored; the service may
    /// already be down, which is the state restart wants anyway.
    pub async fn restart(&self, name: &str) -> Result<(), OrchestratorError> {
        let descriptor = self.registry.current().lookup(name)?.clone();
        info!(service = %descriptor.name, "restarting service");

        if let Err(err) = self.lifecycle.stop(&descriptor).await {
            warn!(service = %descriptor.name, error = %err, "stop hook failed during restart");
        }
        self.lifecycle
            .start(&descriptor)
            .await
            .map_err(|source| OrchestratorError::StartHook {
                service: descriptor.name.clone(),
                source,
            })?;

        if self
            .health
            .wait_until_healthy(name, self.config.startup_timeout)
            .await
        {
            info!(service = %descriptor.name, "service healthy after restart");
            Ok(())
        } else {
            Err(OrchestratorError::NotHealthy {
                service: descriptor.name,
            })
        }
    }
}
