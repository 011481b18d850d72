//! lattice-orchestrator — dependency-ordered startup and shutdown.
//!
//! Walks the registry's dependency graph: start order from a
//! topological sort with health gates between layers, stop order
//! reversed. Process management stays outside, behind the
//! [`Lifecycle`] trait.

pub mod orchestrator;
pub mod plan;

pub use orchestrator::{
    HookError, Lifecycle, Orchestrator, OrchestratorConfig, OrchestratorError,
};
pub use plan::{FailureReason, ServicePhase, StartFailure, StartSummary, StopSummary};
