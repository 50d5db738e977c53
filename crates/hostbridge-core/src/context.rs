//! Read-only view handed to behaviors.
//!
//! [`Context`] is what behavior code sees. [`StepContext`] implements it over
//! a host context handle and the [`StepCache`]: messages and neighbors are
//! fetched the first time they are read and kept for the rest of the
//! invocation, so behaviors that never look at them cost nothing.

use std::cell::OnceCell;

use hostbridge_types::{AgentState, Datasets, Globals, Message};

use crate::cache::{CacheError, StepCache};
use crate::host::{ContextHandle, HostError};

/// Errors raised by lazy context accessors.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// The host could not provide messages or neighbor ids.
    #[error("host error: {source}")]
    Host {
        /// The underlying host error.
        #[from]
        source: HostError,
    },

    /// A neighbor could not be resolved from the step cache.
    #[error("neighbor lookup failed: {source}")]
    Cache {
        /// The underlying cache error.
        #[from]
        source: CacheError,
    },
}

/// The behavior-facing view of one invocation.
pub trait Context {
    /// Messages delivered to this agent this step.
    fn messages(&self) -> Result<&[Message], ContextError>;

    /// Neighbor states as of this step.
    fn neighbors(&self) -> Result<&[AgentState], ContextError>;

    /// Global properties.
    fn globals(&self) -> &Globals;

    /// Datasets by name.
    fn data(&self) -> &Datasets;

    /// The current step number.
    fn step(&self) -> u64;
}

/// Messages and neighbors captured for error reports.
///
/// Globals are deliberately absent; they can be large.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosticSnapshot {
    /// Messages delivered to the agent, if they could be read.
    pub messages: Vec<Message>,
    /// Resolved neighbors, if they could be read.
    pub neighbors: Vec<AgentState>,
    /// Accessors that failed while taking the snapshot.
    pub unavailable: Vec<String>,
}

/// [`Context`] backed by a host context handle and the step cache.
pub struct StepContext<'a> {
    handle: &'a dyn ContextHandle,
    cache: &'a StepCache,
    globals: &'a Globals,
    datasets: &'a Datasets,
    messages: OnceCell<Vec<Message>>,
    neighbors: OnceCell<Vec<AgentState>>,
}

impl<'a> StepContext<'a> {
    /// Build a context for one invocation.
    pub const fn new(
        handle: &'a dyn ContextHandle,
        cache: &'a StepCache,
        globals: &'a Globals,
        datasets: &'a Datasets,
    ) -> Self {
        Self {
            handle,
            cache,
            globals,
            datasets,
            messages: OnceCell::new(),
            neighbors: OnceCell::new(),
        }
    }

    /// Capture messages and neighbors for an error report.
    pub fn snapshot(&self) -> DiagnosticSnapshot {
        let mut snapshot = DiagnosticSnapshot::default();
        match self.messages() {
            Ok(messages) => snapshot.messages = messages.to_vec(),
            Err(e) => snapshot.unavailable.push(format!("messages: {e}")),
        }
        match self.neighbors() {
            Ok(neighbors) => snapshot.neighbors = neighbors.to_vec(),
            Err(e) => snapshot.unavailable.push(format!("neighbors: {e}")),
        }
        snapshot
    }
}

impl Context for StepContext<'_> {
    fn messages(&self) -> Result<&[Message], ContextError> {
        if let Some(messages) = self.messages.get() {
            return Ok(messages);
        }
        let fetched = self.handle.messages()?;
        Ok(self.messages.get_or_init(|| fetched))
    }

    fn neighbors(&self) -> Result<&[AgentState], ContextError> {
        if let Some(neighbors) = self.neighbors.get() {
            return Ok(neighbors);
        }
        let ids = self.handle.neighbor_ids()?;
        let resolved = self.cache.resolve_neighbors(&ids)?;
        Ok(self.neighbors.get_or_init(|| resolved))
    }

    fn globals(&self) -> &Globals {
        self.globals
    }

    fn data(&self) -> &Datasets {
        self.datasets
    }

    fn step(&self) -> u64 {
        self.cache.current_step()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use hostbridge_types::AgentId;

    use super::*;
    use crate::host::Release;

    struct Counting {
        neighbor_ids: Vec<AgentId>,
        reads: Cell<u32>,
    }

    impl Release for Counting {
        fn release(&mut self) {}
    }

    impl ContextHandle for Counting {
        fn messages(&self) -> Result<Vec<Message>, HostError> {
            self.reads.set(self.reads.get().saturating_add(1));
            Ok(vec![Message::new("a", "ping", None)])
        }

        fn neighbor_ids(&self) -> Result<Vec<AgentId>, HostError> {
            self.reads.set(self.reads.get().saturating_add(1));
            Ok(self.neighbor_ids.clone())
        }
    }

    #[test]
    fn accessors_are_lazy_and_memoized() {
        let mut cache = StepCache::new();
        cache
            .advance_step(&[AgentState::new("a"), AgentState::new("b")])
            .unwrap();
        let handle = Counting {
            neighbor_ids: vec![AgentId::from("b")],
            reads: Cell::new(0),
        };
        let globals = Globals::new();
        let datasets = Datasets::new();
        let ctx = StepContext::new(&handle, &cache, &globals, &datasets);

        assert_eq!(handle.reads.get(), 0);
        assert_eq!(ctx.messages().unwrap().len(), 1);
        assert_eq!(ctx.messages().unwrap().len(), 1);
        assert_eq!(ctx.neighbors().unwrap().len(), 1);
        assert_eq!(ctx.neighbors().unwrap().len(), 1);
        assert_eq!(handle.reads.get(), 2);
        assert_eq!(ctx.step(), 1);
    }

    #[test]
    fn snapshot_records_unresolvable_neighbors() {
        let cache = StepCache::new();
        let handle = Counting {
            neighbor_ids: vec![AgentId::from("ghost")],
            reads: Cell::new(0),
        };
        let globals = Globals::new();
        let datasets = Datasets::new();
        let ctx = StepContext::new(&handle, &cache, &globals, &datasets);

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.messages.len(), 1);
        assert!(snapshot.neighbors.is_empty());
        assert_eq!(snapshot.unavailable.len(), 1);
    }
}
