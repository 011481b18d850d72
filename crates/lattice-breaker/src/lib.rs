//! lattice-breaker — per-edge circuit breaking for Lattice.
//!
//! Protects callers from repeatedly hammering a failing dependency. The
//! state machine itself ([`CircuitBreaker`]) is pure and clock-injected;
//! [`BreakerManager`] keys breakers by [`lattice_registry::Edge`] and
//! supplies wall time and locking.

pub mod breaker;
pub mod manager;

pub use breaker::{BreakerConfig, BreakerState, BreakerStats, CircuitBreaker};
pub use manager::BreakerManager;
