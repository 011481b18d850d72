//! lattice-health — continuous health evaluation for Lattice services.
//!
//! One background probe loop per registered service writes verdicts to a
//! shared [`HealthBoard`]; the dispatcher, breaker wiring and orchestrator
//! read the board. Probes never surface errors to callers: a probe that
//! cannot run is an unhealthy verdict, not an exception.

pub mod board;
pub mod monitor;
pub mod probe;

pub use board::{HealthBoard, HealthRecord, HealthSummary};
pub use monitor::{HealthCallback, HealthMonitor};
pub use probe::{ProbeOutcome, http_probe, probe_service, tcp_probe};
