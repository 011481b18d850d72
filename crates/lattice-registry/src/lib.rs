//! lattice-registry — the service catalog for Lattice.
//!
//! Holds the shared vocabulary of the mesh (descriptors, health verdicts,
//! edges, error classes), parses registry documents (TOML/JSON/YAML),
//! validates the declared dependency graph and produces immutable
//! [`RegistrySnapshot`]s.
//!
//! # Architecture
//!
//! A snapshot is built once per load: document → typed descriptors →
//! validated [`DependencyGraph`] (unknown references and cycles are fatal)
//! with a precomputed topological start order. Live processes reach the
//! current snapshot through a [`SharedRegistry`], which swaps whole
//! snapshots atomically on reload; descriptors themselves never mutate.

pub mod document;
pub mod error;
pub mod graph;
pub mod snapshot;
pub mod types;

pub use document::{RegistryDocument, ServiceEntry};
pub use error::{ConfigError, ServiceNotFound};
pub use graph::DependencyGraph;
pub use snapshot::{Discoverer, RegistrySnapshot, SharedRegistry, StaticDiscoverer};
pub use types::*;
