//! lattice-dispatch — guarded inter-service requests.
//!
//! Combines the registry (who is the callee), the breaker manager
//! (may we call), the health board (should we bother) and the
//! telemetry hub (how did it go) around a pluggable [`Transport`].

pub mod dispatcher;
pub mod transport;

pub use dispatcher::{DispatchError, DispatchPolicy, Dispatcher};
pub use transport::{
    DispatchResponse, HttpTransport, PoolConfig, RequestSpec, ScriptedCall, ScriptedTransport,
    Transport, TransportError,
};
