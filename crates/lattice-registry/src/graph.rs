//! Dependency graph over registered services.
//!
//! Edges point from a service to the services it requires. The graph is
//! validated at registry load: every referenced dependency must exist and
//! the graph must be acyclic. A topological order (dependencies before
//! dependents) is precomputed for the orchestrator.

use std::collections::HashMap;

use crate::error::ConfigError;
use crate::types::{ServiceDescriptor, ServiceName};

/// Validated dependency graph with a precomputed start order.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// service → declared dependencies, in declaration order.
    requires: HashMap<ServiceName, Vec<ServiceName>>,
    /// service → services that declared a dependency on it.
    required_by: HashMap<ServiceName, Vec<ServiceName>>,
    /// Topological order: every service appears after all of its dependencies.
    order: Vec<ServiceName>,
}

impl DependencyGraph {
    /// Build and validate the graph from descriptors in declaration order.
    ///
    /// Fails on references to undefined services, self-dependencies and
    /// dependency cycles. The reported cycle lists its members in walk
    /// order, closing the loop on the repeated service.
    pub fn build(services: &[ServiceDescriptor]) -> Result<Self, ConfigError> {
        let mut requires: HashMap<ServiceName, Vec<ServiceName>> = HashMap::new();
        let mut required_by: HashMap<ServiceName, Vec<ServiceName>> = HashMap::new();

        for service in services {
            requires.insert(service.name.clone(), service.depends_on.clone());
            required_by.entry(service.name.clone()).or_default();
        }

        for service in services {
            for dep in &service.depends_on {
                if *dep == service.name {
                    return Err(ConfigError::SelfDependency(service.name.clone()));
                }
                if !requires.contains_key(dep) {
                    return Err(ConfigError::UnknownDependency {
                        service: service.name.clone(),
                        dependency: dep.clone(),
                    });
                }
                required_by
                    .entry(dep.clone())
                    .or_default()
                    .push(service.name.clone());
            }
        }

        // Depth-first postorder from each root in declaration order gives a
        // deterministic topological order and detects back edges.
        let mut marks: HashMap<ServiceName, Mark> = HashMap::new();
        let mut stack: Vec<ServiceName> = Vec::new();
        let mut order: Vec<ServiceName> = Vec::with_capacity(services.len());
        for service in services {
            visit(&service.name, &requires, &mut marks, &mut stack, &mut order)?;
        }

        Ok(Self {
            requires,
            required_by,
            order,
        })
    }

    /// Declared dependencies of a service, in declaration order.
    pub fn dependencies_of(&self, name: &str) -> &[ServiceName] {
        self.requires.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Services that declared a dependency on `name`.
    pub fn dependents_of(&self, name: &str) -> &[ServiceName] {
        self.required_by
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Startup order: every service appears after its dependencies.
    pub fn start_order(&self) -> &[ServiceName] {
        &self.order
    }

    /// Shutdown order: dependents stop before their dependencies.
    pub fn stop_order(&self) -> Vec<ServiceName> {
        self.order.iter().rev().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.requires.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.requires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requires.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

fn visit(
    name: &str,
    requires: &HashMap<ServiceName, Vec<ServiceName>>,
    marks: &mut HashMap<ServiceName, Mark>,
    stack: &mut Vec<ServiceName>,
    order: &mut Vec<ServiceName>,
) -> Result<(), ConfigError> {
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            // Back edge. The cycle is the walk from the first occurrence of
            // `name` on the stack back to it.
            let start = stack.iter().position(|s| s == name).unwrap_or(0);
            let mut members: Vec<ServiceName> = stack[start..].to_vec();
            members.push(name.to_string());
            return Err(ConfigError::DependencyCycle { members });
        }
        None => {}
    }

    marks.insert(name.to_string(), Mark::Visiting);
    stack.push(name.to_string());
    for dep in requires.get(name).map(Vec::as_slice).unwrap_or(&[]) {
        visit(dep, requires, marks, stack, order)?;
    }
    stack.pop();
    marks.insert(name.to_string(), Mark::Done);
    order.push(name.to_string());
    Ok(())
}
