//! In-memory engine that records the declared graph as a plan.
//!
//! `PlanEngine` is the dry-run backend used by the CLI and the test suite. It
//! keeps every declaration, derives implicit edges from output references,
//! refuses edges that would close a cycle, and renders the graph in a
//! deterministic topological order. Outputs of resources declared in the
//! plan stay references; outputs of pre-registered existing resources (for
//! example subnets looked up by the configuration layer) are known values.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::{Engine, EngineFuture, Output, ResourceDecl, ResourceRef};

/// Errors raised while recording a plan.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PlanError {
    /// Raised when a logical name is declared twice for the same kind.
    #[error("resource {0} is already declared")]
    DuplicateResource(ResourceRef),
    /// Raised when a declaration or read names a resource the plan does not
    /// know about.
    #[error("resource {0} is neither declared nor registered as existing")]
    UnknownResource(ResourceRef),
    /// Raised when an existing resource lacks the requested output.
    #[error("existing resource {resource} has no output `{key}`")]
    UnknownOutput {
        /// Resource that was read.
        resource: ResourceRef,
        /// Requested output key.
        key: String,
    },
    /// Raised when an edge would make the graph cyclic.
    #[error("dependency {dependent} -> {dependency} would create a cycle")]
    Cycle {
        /// Resource that would wait.
        dependent: ResourceRef,
        /// Resource that would be waited on.
        dependency: ResourceRef,
    },
    /// Raised when a previous holder of the plan lock panicked.
    #[error("plan state lock poisoned")]
    StatePoisoned,
}

/// One resource in a rendered plan.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlannedResource {
    /// Declared resource.
    #[serde(flatten)]
    pub decl: ResourceDecl,
    /// Declared resources this one waits on, explicit or implicit.
    pub after: Vec<ResourceRef>,
}

/// Declared graph in apply order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Plan {
    /// Resources sorted so every resource follows its dependencies.
    pub resources: Vec<PlannedResource>,
    /// Pre-existing resources the plan reads from.
    pub external: Vec<ResourceRef>,
}

impl Plan {
    /// Position of a resource in apply order.
    #[must_use]
    pub fn position(&self, resource: &ResourceRef) -> Option<usize> {
        self.resources
            .iter()
            .position(|planned| &planned.decl.resource_ref() == resource)
    }
}

#[derive(Debug, Default)]
struct PlanState {
    declared: BTreeMap<ResourceRef, ResourceDecl>,
    sequence: Vec<ResourceRef>,
    edges: BTreeMap<ResourceRef, BTreeSet<ResourceRef>>,
    existing: BTreeMap<ResourceRef, BTreeMap<String, String>>,
}

impl PlanState {
    fn knows(&self, resource: &ResourceRef) -> bool {
        self.declared.contains_key(resource) || self.existing.contains_key(resource)
    }

    fn reaches(&self, from: &ResourceRef, to: &ResourceRef) -> bool {
        let mut stack = vec![from.clone()];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if &current == to {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(next) = self.edges.get(&current) {
                stack.extend(next.iter().cloned());
            }
        }
        false
    }

    fn add_edge(
        &mut self,
        dependent: &ResourceRef,
        dependency: &ResourceRef,
    ) -> Result<(), PlanError> {
        if !self.knows(dependent) {
            return Err(PlanError::UnknownResource(dependent.clone()));
        }
        if !self.knows(dependency) {
            return Err(PlanError::UnknownResource(dependency.clone()));
        }
        if dependent == dependency || self.reaches(dependency, dependent) {
            return Err(PlanError::Cycle {
                dependent: dependent.clone(),
                dependency: dependency.clone(),
            });
        }
        self.edges
            .entry(dependent.clone())
            .or_default()
            .insert(dependency.clone());
        Ok(())
    }
}

/// Dry-run [`Engine`] recording declarations in memory.
#[derive(Debug, Default)]
pub struct PlanEngine {
    state: Mutex<PlanState>,
}

impl PlanEngine {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pre-existing resource whose outputs are already known.
    ///
    /// The plan is owned here, so a poisoned lock is recovered and cleared
    /// rather than dropping the registration.
    #[must_use]
    pub fn with_existing<K, V>(
        mut self,
        resource: ResourceRef,
        outputs: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.existing.insert(
            resource,
            outputs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self.state.clear_poison();
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, PlanState>, PlanError> {
        self.state.lock().map_err(|_| PlanError::StatePoisoned)
    }

    fn declare(&self, decl: ResourceDecl) -> Result<ResourceRef, PlanError> {
        let mut state = self.lock()?;
        let resource = decl.resource_ref();
        if state.knows(&resource) {
            return Err(PlanError::DuplicateResource(resource));
        }
        let dependencies = decl.dependencies();
        if let Some(unknown) = dependencies.iter().find(|dep| !state.knows(dep)) {
            return Err(PlanError::UnknownResource(unknown.clone()));
        }

        debug!(resource = %resource, dependencies = dependencies.len(), "declared resource");
        state.declared.insert(resource.clone(), decl);
        state.sequence.push(resource.clone());
        for dependency in &dependencies {
            state.add_edge(&resource, dependency)?;
        }
        Ok(resource)
    }

    fn depend(&self, dependent: &ResourceRef, dependency: &ResourceRef) -> Result<(), PlanError> {
        self.lock()?.add_edge(dependent, dependency)
    }

    fn read(&self, resource: &ResourceRef, key: &str) -> Result<Output, PlanError> {
        let state = self.lock()?;
        if state.declared.contains_key(resource) {
            return Ok(Output::reference(resource.output(key)));
        }
        let outputs = state
            .existing
            .get(resource)
            .ok_or_else(|| PlanError::UnknownResource(resource.clone()))?;
        outputs
            .get(key)
            .map(Output::known)
            .ok_or_else(|| PlanError::UnknownOutput {
                resource: resource.clone(),
                key: key.to_owned(),
            })
    }

    /// Returns a copy of a declared resource.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::StatePoisoned`] when the plan lock is poisoned.
    pub fn resource(&self, resource: &ResourceRef) -> Result<Option<ResourceDecl>, PlanError> {
        Ok(self.lock()?.declared.get(resource).cloned())
    }

    /// Number of declared resources.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::StatePoisoned`] when the plan lock is poisoned.
    pub fn len(&self) -> Result<usize, PlanError> {
        Ok(self.lock()?.declared.len())
    }

    /// Whether nothing has been declared yet.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::StatePoisoned`] when the plan lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, PlanError> {
        Ok(self.lock()?.declared.is_empty())
    }

    /// Renders the declared graph in apply order.
    ///
    /// Ties are broken by declaration order so the same inputs always yield
    /// the same plan.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::StatePoisoned`] when the plan lock is poisoned, or
    /// [`PlanError::Cycle`] if the recorded edges are cyclic.
    pub fn snapshot(&self) -> Result<Plan, PlanError> {
        let state = self.lock()?;
        let declared_deps = |resource: &ResourceRef| -> BTreeSet<ResourceRef> {
            state
                .edges
                .get(resource)
                .map(|deps| {
                    deps.iter()
                        .filter(|dep| state.declared.contains_key(*dep))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut placed: BTreeSet<ResourceRef> = BTreeSet::new();
        let mut resources = Vec::with_capacity(state.sequence.len());
        while resources.len() < state.sequence.len() {
            let next = state.sequence.iter().find(|candidate| {
                !placed.contains(*candidate)
                    && declared_deps(candidate).iter().all(|dep| placed.contains(dep))
            });
            let Some(resource) = next else {
                let stuck = state
                    .sequence
                    .iter()
                    .find(|candidate| !placed.contains(*candidate))
                    .cloned()
                    .ok_or(PlanError::StatePoisoned)?;
                return Err(PlanError::Cycle {
                    dependent: stuck.clone(),
                    dependency: stuck,
                });
            };
            let decl = state
                .declared
                .get(resource)
                .cloned()
                .ok_or_else(|| PlanError::UnknownResource(resource.clone()))?;
            resources.push(PlannedResource {
                decl,
                after: declared_deps(resource).into_iter().collect(),
            });
            placed.insert(resource.clone());
        }

        let external = state
            .edges
            .values()
            .flatten()
            .filter(|dep| state.existing.contains_key(*dep))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(Plan {
            resources,
            external,
        })
    }
}

impl Engine for PlanEngine {
    type Error = PlanError;

    fn declare_resource(&self, decl: ResourceDecl) -> EngineFuture<'_, ResourceRef, Self::Error> {
        Box::pin(async move { self.declare(decl) })
    }

    fn declare_dependency<'a>(
        &'a self,
        dependent: &'a ResourceRef,
        dependency: &'a ResourceRef,
    ) -> EngineFuture<'a, (), Self::Error> {
        Box::pin(async move { self.depend(dependent, dependency) })
    }

    fn read_output<'a>(
        &'a self,
        resource: &'a ResourceRef,
        key: &'a str,
    ) -> EngineFuture<'a, Output, Self::Error> {
        Box::pin(async move { self.read(resource, key) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Property, kinds};
    use rstest::{fixture, rstest};

    fn subnet() -> ResourceRef {
        ResourceRef::new(kinds::SUBNET, "subnet-1")
    }

    #[fixture]
    fn engine() -> PlanEngine {
        PlanEngine::new().with_existing(subnet(), [("cidr_block", "10.0.1.0/24")])
    }

    #[rstest]
    fn reads_known_outputs_of_existing_resources(engine: PlanEngine) {
        let output = engine
            .read(&subnet(), "cidr_block")
            .unwrap_or_else(|err| panic!("read: {err}"));
        assert_eq!(output.as_known(), Some("10.0.1.0/24"));
    }

    #[rstest]
    fn registration_survives_a_poisoned_lock() {
        let poisoned = PlanEngine::new();
        std::thread::scope(|scope| {
            let outcome = scope
                .spawn(|| {
                    let _held = poisoned.state.lock();
                    panic!("poison the plan lock");
                })
                .join();
            assert!(outcome.is_err());
        });
        assert!(poisoned.state.is_poisoned());

        let engine = poisoned.with_existing(subnet(), [("cidr_block", "10.0.1.0/24")]);

        let output = engine
            .read(&subnet(), "cidr_block")
            .unwrap_or_else(|err| panic!("read: {err}"));
        assert_eq!(output.as_known(), Some("10.0.1.0/24"));
    }

    #[rstest]
    fn missing_existing_output_is_an_error(engine: PlanEngine) {
        let err = engine
            .read(&subnet(), "ipv6_cidr_block")
            .expect_err("output should be missing");
        assert!(matches!(err, PlanError::UnknownOutput { ref key, .. } if key == "ipv6_cidr_block"));
    }

    #[rstest]
    fn declared_outputs_are_references(engine: PlanEngine) {
        let eni = engine
            .declare(ResourceDecl::new(kinds::NETWORK_INTERFACE, "gw-eni"))
            .unwrap_or_else(|err| panic!("declare: {err}"));
        let output = engine
            .read(&eni, "id")
            .unwrap_or_else(|err| panic!("read: {err}"));
        assert_eq!(output, Output::reference(eni.output("id")));
    }

    #[rstest]
    fn rejects_duplicate_declarations(engine: PlanEngine) {
        engine
            .declare(ResourceDecl::new(kinds::ELASTIC_IP, "gw-eip"))
            .unwrap_or_else(|err| panic!("declare: {err}"));
        let err = engine
            .declare(ResourceDecl::new(kinds::ELASTIC_IP, "gw-eip"))
            .expect_err("duplicate should fail");
        assert!(matches!(err, PlanError::DuplicateResource(_)));
    }

    #[rstest]
    fn rejects_references_to_undeclared_resources(engine: PlanEngine) {
        let ghost = ResourceRef::new(kinds::ELASTIC_IP, "ghost");
        let err = engine
            .declare(
                ResourceDecl::new(kinds::DNS_RECORD, "gw-a")
                    .property("records", vec![Property::from(ghost.output("public_ip"))]),
            )
            .expect_err("unknown reference should fail");
        assert_eq!(err, PlanError::UnknownResource(ghost));
    }

    #[rstest]
    fn rejects_cyclic_dependencies(engine: PlanEngine) {
        let first = engine
            .declare(ResourceDecl::new(kinds::ELASTIC_IP, "first"))
            .unwrap_or_else(|err| panic!("declare: {err}"));
        let second = engine
            .declare(ResourceDecl::new(kinds::ELASTIC_IP, "second").depends_on(&first))
            .unwrap_or_else(|err| panic!("declare: {err}"));

        let err = engine
            .depend(&first, &second)
            .expect_err("cycle should be rejected");
        assert!(matches!(err, PlanError::Cycle { .. }));
    }

    #[rstest]
    fn snapshot_orders_dependencies_first(engine: PlanEngine) {
        let eip = engine
            .declare(ResourceDecl::new(kinds::ELASTIC_IP, "gw-eip"))
            .unwrap_or_else(|err| panic!("declare: {err}"));
        let instance = engine
            .declare(
                ResourceDecl::new(kinds::INSTANCE, "gw")
                    .property("subnet_id", subnet().output("id")),
            )
            .unwrap_or_else(|err| panic!("declare: {err}"));
        engine
            .depend(&eip, &instance)
            .unwrap_or_else(|err| panic!("depend: {err}"));

        let plan = engine.snapshot().unwrap_or_else(|err| panic!("snapshot: {err}"));

        assert!(plan.position(&instance) < plan.position(&eip));
        assert_eq!(plan.external, vec![subnet()]);
    }
}
