//! lattice-runtime — the assembled mesh control plane.

pub mod runtime;

pub use runtime::{EdgeReport, MeshRuntime, MeshRuntimeBuilder};
