//! Guarded request dispatch.
//!
//! Every call flows through the same gauntlet: resolve the callee in
//! the registry, ask the edge's circuit breaker for admission, then
//! attempt the exchange with retries and exponential backoff. Each
//! attempt's outcome feeds back into the breaker and the telemetry
//! window, so the guards tighten as a callee degrades.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use lattice_breaker::BreakerManager;
use lattice_health::HealthBoard;
use lattice_registry::{
    Edge, ErrorClass, HealthVerdict, ServiceName, ServiceNotFound, SharedRegistry,
};
use lattice_telemetry::{RequestRecord, TelemetryHub};

use crate::transport::{DispatchResponse, RequestSpec, Transport, TransportError};

/// Caller-side knobs that shape every dispatch.
#[derive(Debug, Clone, Default)]
pub struct DispatchPolicy {
    /// Name recorded as the caller side of each edge. `None` labels
    /// edges by callee alone.
    pub local_identity: Option<ServiceName>,
    /// Reject calls to services the health board marks unhealthy
    /// without spending an attempt.
    pub fail_fast_unhealthy: bool,
}

/// Why a dispatch did not return a response.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    NotFound(#[from] ServiceNotFound),
    #[error("circuit open for {edge}")]
    CircuitOpen { edge: Edge },
    #[error("service {0} is unhealthy")]
    Unhealthy(ServiceName),
    #[error("request to {service} timed out after {attempts} attempts")]
    Timeout { service: ServiceName, attempts: u32 },
    #[error("request to {service} failed after {attempts} attempts: {source}")]
    Transport {
        service: ServiceName,
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("{service} answered {status} on all {attempts} attempts")]
    Upstream {
        service: ServiceName,
        status: u16,
        attempts: u32,
    },
}

/// Entry point for inter-service calls.
pub struct Dispatcher {
    registry: SharedRegistry,
    breakers: Arc<BreakerManager>,
    telemetry: Arc<TelemetryHub>,
    health: HealthBoard,
    transport: Arc<dyn Transport>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(
        registry: SharedRegistry,
        breakers: Arc<BreakerManager>,
        telemetry: Arc<TelemetryHub>,
        health: HealthBoard,
        transport: Arc<dyn Transport>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            registry,
            breakers,
            telemetry,
            health,
            transport,
            policy,
        }
    }

    /// Send one request to `callee`, retrying per its retry policy.
    ///
    /// Responses below 500 are returned as-is; callers interpret their
    /// own 4xx. Server errors and transport failures are retried until
    /// the policy is exhausted, with the breaker re-consulted after
    /// every backoff sleep so an edge that trips mid-sequence stops
    /// the remaining attempts.
    pub async fn execute(
        &self,
        callee: &str,
        spec: RequestSpec,
    ) -> Result<DispatchResponse, DispatchError> {
        let service = self.registry.current().lookup(callee)?.clone();

        let edge = match &self.policy.local_identity {
            Some(caller) => Edge::between(caller.clone(), service.name.clone()),
            None => Edge::to(service.name.clone()),
        };

        if !self.breakers.can_execute(&edge) {
            return Err(DispatchError::CircuitOpen { edge });
        }
        if self.policy.fail_fast_unhealthy
            && self.health.verdict(&service.name) == HealthVerdict::Unhealthy
        {
            return Err(DispatchError::Unhealthy(service.name.clone()));
        }

        let timeout = spec.timeout.unwrap_or(service.timeout);
        let retry = service.retry;
        let mut attempts: u32 = 0;

        loop {
            if attempts > 0 {
                let delay = backoff_delay(retry.base_delay, retry.max_delay, attempts - 1);
                debug!(%edge, attempt = attempts + 1, delay_ms = delay.as_millis() as u64, "backing off before retry");
                tokio::time::sleep(delay).await;
                if !self.breakers.can_execute(&edge) {
                    return Err(DispatchError::CircuitOpen { edge });
                }
            }

            let started = Instant::now();
            let outcome = self.transport.send(&service, &spec, timeout).await;
            let latency = started.elapsed();
            attempts += 1;

            match outcome {
                Ok(response) if !response.status.is_server_error() => {
                    self.report(&edge, true, None, latency);
                    return Ok(response);
                }
                Ok(response) => {
                    self.report(&edge, false, Some(ErrorClass::Server), latency);
                    if attempts > retry.max_retries {
                        warn!(%edge, attempts, status = response.status.as_u16(), "upstream kept failing, giving up");
                        return Err(DispatchError::Upstream {
                            service: service.name.clone(),
                            status: response.status.as_u16(),
                            attempts,
                        });
                    }
                }
                Err(err) => {
                    self.report(&edge, false, Some(err.class()), latency);
                    if attempts > retry.max_retries {
                        warn!(%edge, attempts, error = %err, "transport kept failing, giving up");
                        return Err(match err {
                            TransportError::Timeout => DispatchError::Timeout {
                                service: service.name.clone(),
                                attempts,
                            },
                            other => DispatchError::Transport {
                                service: service.name.clone(),
                                attempts,
                                source: other,
                            },
                        });
                    }
                }
            }
        }
    }

    fn report(&self, edge: &Edge, success: bool, error: Option<ErrorClass>, latency: Duration) {
        if success {
            self.breakers.record_success(edge, latency);
        } else {
            self.breakers.record_failure(edge, latency);
        }
        self.telemetry.record(RequestRecord {
            edge: edge.clone(),
            success,
            error,
            latency,
        });
    }
}

/// Delay before retry number `exponent + 1`: base doubled per retry,
/// clamped to `cap`.
fn backoff_delay(base: Duration, cap: Duration, exponent: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(exponent)).min(cap)
}
