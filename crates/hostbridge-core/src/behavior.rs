//! Named behaviors and the runner that applies one to one agent.
//!
//! [`BehaviorRunner::apply`] is the only place a behavior touches host state:
//!
//! 1. Build a [`StepContext`] over the context handle and the step cache.
//! 2. Wrap the state handle in a [`StateProxy`].
//! 3. Call the behavior.
//! 4. On success, flush the proxy's buffered writes to the host.
//! 5. On failure, attach a messages/neighbors snapshot to the error.
//!
//! Both handles are moved into `apply` inside [`HostHandle`] guards and are
//! released when it returns, whichever path it returns by.

use std::collections::BTreeMap;
use std::sync::Arc;

use hostbridge_types::{AgentId, Datasets, Globals};
use serde_json::Value;
use tracing::debug;

use crate::cache::StepCache;
use crate::context::{Context, DiagnosticSnapshot, StepContext};
use crate::host::{AgentStateHandle, ContextHandle, HostError, HostHandle};
use crate::proxy::StateProxy;

/// Signature of a behavior body.
pub type BehaviorFn = dyn Fn(&mut StateProxy<'_>, &dyn Context) -> anyhow::Result<()> + Send + Sync;

/// Errors raised while applying behaviors.
#[derive(Debug, thiserror::Error)]
pub enum BehaviorError {
    /// The behavior body returned an error.
    #[error("behavior `{name}` failed on agent {agent_id}: {source}")]
    ExecutionFailed {
        /// The behavior that failed.
        name: String,
        /// The agent it ran on.
        agent_id: AgentId,
        /// The error the behavior returned.
        source: anyhow::Error,
        /// Messages and neighbors at the time of failure.
        snapshot: Box<DiagnosticSnapshot>,
    },

    /// The host rejected one of the behavior's writes.
    #[error("behavior `{name}` could not write `{field}` on agent {agent_id}: {source}")]
    FlushFailed {
        /// The behavior whose writes were rejected.
        name: String,
        /// The agent it ran on.
        agent_id: AgentId,
        /// The rejected field.
        field: String,
        /// The rejected value.
        value: Value,
        /// The host's error.
        source: Box<HostError>,
        /// Messages and neighbors at the time of failure.
        snapshot: Box<DiagnosticSnapshot>,
    },

    /// An agent lists a behavior that is not registered.
    #[error("unknown behavior `{name}`")]
    Unknown {
        /// The unregistered name.
        name: String,
    },
}

/// A behavior body with its name and declared dependencies.
#[derive(Clone)]
pub struct NamedBehavior {
    /// Name agents use in their `behaviors` list.
    pub name: String,
    /// Names of other behaviors this one expects to be registered.
    pub dependencies: Vec<String>,
    behavior: Arc<BehaviorFn>,
}

impl NamedBehavior {
    /// Wrap a behavior body.
    pub fn new<F>(name: impl Into<String>, dependencies: Vec<String>, behavior: F) -> Self
    where
        F: Fn(&mut StateProxy<'_>, &dyn Context) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dependencies,
            behavior: Arc::new(behavior),
        }
    }

    fn call(&self, proxy: &mut StateProxy<'_>, context: &dyn Context) -> anyhow::Result<()> {
        (self.behavior)(proxy, context)
    }
}

impl std::fmt::Debug for NamedBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedBehavior")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Behaviors available to a simulation, by name.
#[derive(Debug, Clone, Default)]
pub struct BehaviorRegistry {
    behaviors: BTreeMap<String, NamedBehavior>,
}

impl BehaviorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a behavior.
    pub fn register(&mut self, behavior: NamedBehavior) {
        self.behaviors.insert(behavior.name.clone(), behavior);
    }

    /// Look up one behavior.
    pub fn get(&self, name: &str) -> Option<&NamedBehavior> {
        self.behaviors.get(name)
    }

    /// Number of registered behaviors.
    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    /// Resolve an agent's behavior list, preserving order.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<&NamedBehavior>, BehaviorError> {
        names
            .iter()
            .map(|name| {
                self.get(name).ok_or_else(|| BehaviorError::Unknown {
                    name: name.clone(),
                })
            })
            .collect()
    }

    /// Declared dependencies that are not registered, as `(behavior, dependency)`.
    pub fn missing_dependencies(&self) -> Vec<(String, String)> {
        self.behaviors
            .values()
            .flat_map(|b| {
                b.dependencies
                    .iter()
                    .filter(|dep| !self.behaviors.contains_key(*dep))
                    .map(|dep| (b.name.clone(), dep.clone()))
            })
            .collect()
    }
}

impl FromIterator<NamedBehavior> for BehaviorRegistry {
    fn from_iter<I: IntoIterator<Item = NamedBehavior>>(iter: I) -> Self {
        let mut registry = Self::new();
        for behavior in iter {
            registry.register(behavior);
        }
        registry
    }
}

/// Applies behaviors for one step.
///
/// Holds the step's shared read-only inputs; create one per step after the
/// step cache has been advanced.
pub struct BehaviorRunner<'a> {
    cache: &'a StepCache,
    globals: &'a Globals,
    datasets: &'a Datasets,
}

impl<'a> BehaviorRunner<'a> {
    /// Bind the runner to this step's cache, globals, and datasets.
    pub const fn new(cache: &'a StepCache, globals: &'a Globals, datasets: &'a Datasets) -> Self {
        Self {
            cache,
            globals,
            datasets,
        }
    }

    /// Run `behavior` against one agent.
    ///
    /// Takes ownership of both handles; they are released before this
    /// returns, on success and on every error.
    pub fn apply<S, C>(
        &self,
        behavior: &NamedBehavior,
        mut state: HostHandle<S>,
        context: HostHandle<C>,
    ) -> Result<(), BehaviorError>
    where
        S: AgentStateHandle,
        C: ContextHandle,
    {
        let ctx = StepContext::new(&*context, self.cache, self.globals, self.datasets);
        let agent_id = state.agent_id();
        let mut proxy = StateProxy::new(&mut *state);

        if let Err(source) = behavior.call(&mut proxy, &ctx) {
            debug!(behavior = %behavior.name, %agent_id, error = %source, "Behavior failed");
            return Err(BehaviorError::ExecutionFailed {
                name: behavior.name.clone(),
                agent_id,
                source,
                snapshot: Box::new(ctx.snapshot()),
            });
        }

        match proxy.flush() {
            Ok(written) => {
                debug!(behavior = %behavior.name, %agent_id, written, "Behavior applied");
                Ok(())
            }
            Err(e) => Err(BehaviorError::FlushFailed {
                name: behavior.name.clone(),
                agent_id: e.agent_id,
                field: e.field,
                value: e.value,
                source: e.source,
                snapshot: Box::new(ctx.snapshot()),
            }),
        }
    }
}
