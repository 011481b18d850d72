//! Immutable registry snapshots.
//!
//! A snapshot is the validated view of the fleet at one point in time:
//! descriptors in declaration order, a name index and the dependency
//! graph. Reload builds a new snapshot and swaps it atomically behind a
//! `SharedRegistry`; in-flight readers keep the snapshot they started with.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::document::RegistryDocument;
use crate::error::{ConfigError, ServiceNotFound};
use crate::graph::DependencyGraph;
use crate::types::{ServiceDescriptor, ServiceName};

/// Validated, immutable view of the registered fleet.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    services: Vec<ServiceDescriptor>,
    index: HashMap<ServiceName, usize>,
    graph: DependencyGraph,
}

impl RegistrySnapshot {
    /// Load and validate a registry file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let doc = RegistryDocument::from_file(path)?;
        let snapshot = Self::from_document(doc)?;
        info!(
            path = %path.display(),
            services = snapshot.len(),
            "registry loaded"
        );
        Ok(snapshot)
    }

    /// Validate a parsed document into a snapshot.
    pub fn from_document(doc: RegistryDocument) -> Result<Self, ConfigError> {
        Self::from_descriptors(doc.into_descriptors()?)
    }

    /// Build a snapshot from already-typed descriptors (discoverer path).
    pub fn from_descriptors(services: Vec<ServiceDescriptor>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(services.len());
        for (i, service) in services.iter().enumerate() {
            if index.insert(service.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateService(service.name.clone()));
            }
        }
        let graph = DependencyGraph::build(&services)?;
        debug!(services = services.len(), "registry snapshot built");
        Ok(Self {
            services,
            index,
            graph,
        })
    }

    /// Descriptor for `name`, or `ServiceNotFound`.
    pub fn lookup(&self, name: &str) -> Result<&ServiceDescriptor, ServiceNotFound> {
        self.get(name)
            .ok_or_else(|| ServiceNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.index.get(name).map(|&i| &self.services[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Descriptors in declaration order.
    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn names(&self) -> impl Iterator<Item = &ServiceName> {
        self.services.iter().map(|s| &s.name)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Declared dependencies of `name`, in declaration order.
    pub fn dependencies_of(&self, name: &str) -> &[ServiceName] {
        self.graph.dependencies_of(name)
    }

    /// Services that declared a dependency on `name`.
    pub fn dependents_of(&self, name: &str) -> &[ServiceName] {
        self.graph.dependents_of(name)
    }

    /// Startup order: dependencies before dependents.
    pub fn start_order(&self) -> &[ServiceName] {
        self.graph.start_order()
    }

    /// Shutdown order: dependents before dependencies.
    pub fn stop_order(&self) -> Vec<ServiceName> {
        self.graph.stop_order()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Atomically swappable handle to the current snapshot.
///
/// Readers take an `Arc` and drop the lock immediately; a swap never
/// invalidates a snapshot somebody is still using.
#[derive(Debug, Clone)]
pub struct SharedRegistry {
    inner: Arc<RwLock<Arc<RegistrySnapshot>>>,
}

impl SharedRegistry {
    pub fn new(snapshot: RegistrySnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<RegistrySnapshot> {
        self.inner.read().expect("registry lock").clone()
    }

    /// Replace the snapshot, returning the one it displaced.
    pub fn swap(&self, snapshot: RegistrySnapshot) -> Arc<RegistrySnapshot> {
        let mut slot = self.inner.write().expect("registry lock");
        std::mem::replace(&mut *slot, Arc::new(snapshot))
    }
}

/// Source of service descriptors.
///
/// Consumers depend only on snapshots; whether entries come from a static
/// file or an external catalog sits behind this seam.
#[async_trait]
pub trait Discoverer: Send + Sync {
    async fn discover(&self) -> Result<Vec<ServiceDescriptor>, ConfigError>;
}

/// Discoverer over a fixed set of descriptors.
pub struct StaticDiscoverer {
    services: Vec<ServiceDescriptor>,
}

impl StaticDiscoverer {
    pub fn new(services: Vec<ServiceDescriptor>) -> Self {
        Self { services }
    }

    pub fn from_document(doc: RegistryDocument) -> Result<Self, ConfigError> {
        Ok(Self {
            services: doc.into_descriptors()?,
        })
    }
}

#[async_trait]
impl Discoverer for StaticDiscoverer {
    async fn discover(&self) -> Result<Vec<ServiceDescriptor>, ConfigError> {
        Ok(self.services.clone())
    }
}
