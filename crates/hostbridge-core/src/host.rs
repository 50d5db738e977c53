//! Capabilities the host exposes through opaque handles.
//!
//! The host owns agent state; scripts only ever see it through handles.
//! Agent-state and context handles must be released exactly once after use.
//! [`HostHandle`] owns such a handle and releases it from `Drop`, so every
//! exit path (return, `?`, panic unwind) releases it and nothing can release
//! it twice.

use std::ops::{Deref, DerefMut};

use hostbridge_types::{AgentId, AgentState, FieldError, Message};
use serde_json::Value;

/// Errors reported by the host through a handle.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The host refused a field write.
    #[error("host rejected write to `{field}`: {reason}")]
    Rejected {
        /// The field that was written.
        field: String,
        /// Why the host refused it.
        reason: String,
    },

    /// Field-level conversion or type check failed.
    #[error(transparent)]
    Field(#[from] FieldError),

    /// The host could not produce the requested data.
    #[error("host data unavailable: {reason}")]
    Unavailable {
        /// Description of what failed.
        reason: String,
    },
}

/// Returns a host resource to its owner. Release cannot fail.
pub trait Release {
    /// Give the resource back to the host.
    fn release(&mut self);
}

/// One agent's state, owned by the host.
pub trait AgentStateHandle: Release {
    /// The agent this handle refers to.
    fn agent_id(&self) -> AgentId;

    /// Read a field. Absent fields yield `None`.
    fn get(&self, field: &str) -> Result<Option<Value>, HostError>;

    /// Write a field.
    fn set(&mut self, field: &str, value: Value) -> Result<(), HostError>;
}

/// Per-invocation inputs for one behavior call, owned by the host.
pub trait ContextHandle: Release {
    /// Messages delivered to the agent this step.
    fn messages(&self) -> Result<Vec<Message>, HostError>;

    /// Ids of the agent's neighbors this step.
    fn neighbor_ids(&self) -> Result<Vec<AgentId>, HostError>;
}

/// Shared state a message handler works against.
pub trait MessageHandlerStateHandle {
    /// Messages addressed to the handler this step.
    fn get_messages(&self) -> Vec<Message>;

    /// Queue a new agent for insertion.
    fn add_agent(&mut self, state: AgentState);

    /// Queue an agent for removal.
    fn remove_agent(&mut self, agent_id: AgentId);

    /// Queue a message for delivery.
    fn add_message(&mut self, message: Message);

    /// Consume the state, yielding every change the handler queued.
    fn into_results(self: Box<Self>) -> HandlerResults;
}

/// Population changes requested by a message handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerResults {
    /// Agents to insert.
    pub added: Vec<AgentState>,
    /// Agents to remove.
    pub removed: Vec<AgentId>,
    /// Messages to deliver.
    pub messages: Vec<Message>,
}

impl HandlerResults {
    /// Whether the handler requested nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.messages.is_empty()
    }
}

/// Owning guard around a releasable host handle.
///
/// The inner handle cannot be moved out, so `Drop` is the only place it is
/// released.
#[derive(Debug)]
pub struct HostHandle<H: Release> {
    handle: H,
}

impl<H: Release> HostHandle<H> {
    /// Take ownership of a handle transferred from the host.
    pub const fn new(handle: H) -> Self {
        Self { handle }
    }
}

impl<H: Release> Deref for HostHandle<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.handle
    }
}

impl<H: Release> DerefMut for HostHandle<H> {
    fn deref_mut(&mut self) -> &mut H {
        &mut self.handle
    }
}

impl<H: Release> Drop for HostHandle<H> {
    fn drop(&mut self) {
        self.handle.release();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    struct Counted(Rc<Cell<u32>>);

    impl Release for Counted {
        fn release(&mut self) {
            self.0.set(self.0.get().saturating_add(1));
        }
    }

    #[test]
    fn drop_releases_once() {
        let count = Rc::new(Cell::new(0));
        {
            let _handle = HostHandle::new(Counted(Rc::clone(&count)));
            assert_eq!(count.get(), 0);
        }
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn early_return_still_releases() {
        fn fails(handle: HostHandle<Counted>) -> Result<(), HostError> {
            let _held = handle;
            Err(HostError::Unavailable {
                reason: "boom".to_owned(),
            })
        }

        let count = Rc::new(Cell::new(0));
        assert!(fails(HostHandle::new(Counted(Rc::clone(&count)))).is_err());
        assert_eq!(count.get(), 1);
    }
}
