//! Deferred-write proxy over one agent-state handle.
//!
//! Behaviors read and write agent fields through a [`StateProxy`]. Reads go
//! to the handle (or to a pending write for the same field); writes stay in a
//! local buffer until [`StateProxy::flush`] pushes them to the host in the
//! order they were first made. `flush` consumes the proxy, so it runs at most
//! once and nothing can touch the proxy afterwards.

use hostbridge_types::agent::{AGENT_ID, MESSAGES};
use hostbridge_types::{AgentId, Message, Recipient};
use serde_json::Value;

use crate::host::{AgentStateHandle, HostError};

/// Errors raised while a behavior uses the proxy.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The field cannot be written by behaviors.
    #[error("field `{field}` is read-only")]
    ReadOnly {
        /// The field that was written.
        field: String,
    },

    /// A read through to the host failed.
    #[error("host read failed: {0}")]
    Host(#[from] HostError),

    /// The `messages` field does not hold a valid message list.
    #[error("outbound messages are malformed: {0}")]
    Messages(#[from] serde_json::Error),
}

/// A pending write the host refused during [`StateProxy::flush`].
#[derive(Debug, thiserror::Error)]
#[error("failed to set `{field}` on agent {agent_id}: {source}")]
pub struct FlushError {
    /// Agent whose handle rejected the write.
    pub agent_id: AgentId,
    /// Field being written.
    pub field: String,
    /// Value that was attempted.
    pub value: Value,
    /// Host-side failure.
    pub source: Box<HostError>,
}

/// Buffers field writes for one behavior invocation.
pub struct StateProxy<'h> {
    handle: &'h mut dyn AgentStateHandle,
    pending: Vec<(String, Value)>,
}

impl<'h> StateProxy<'h> {
    /// Wrap a handle for the duration of one invocation.
    pub fn new(handle: &'h mut dyn AgentStateHandle) -> Self {
        Self {
            handle,
            pending: Vec::new(),
        }
    }

    /// The agent behind the handle.
    pub fn agent_id(&self) -> AgentId {
        self.handle.agent_id()
    }

    /// Read a field, seeing this invocation's own pending writes first.
    pub fn get(&self, field: &str) -> Result<Option<Value>, ProxyError> {
        if let Some(value) = self.pending_value(field) {
            return Ok(Some(value.clone()));
        }
        Ok(self.handle.get(field)?)
    }

    /// Read a numeric field as `f64`. Missing or non-numeric fields yield `None`.
    pub fn get_f64(&self, field: &str) -> Result<Option<f64>, ProxyError> {
        Ok(self.get(field)?.as_ref().and_then(Value::as_f64))
    }

    /// Buffer a write. The handle is not touched until [`flush`](Self::flush).
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<(), ProxyError> {
        if field == AGENT_ID {
            return Err(ProxyError::ReadOnly {
                field: field.to_owned(),
            });
        }
        let value = value.into();
        match self.pending.iter_mut().find(|(name, _)| name == field) {
            Some((_, slot)) => *slot = value,
            None => self.pending.push((field.to_owned(), value)),
        }
        Ok(())
    }

    /// Buffer a write computed from the field's current value.
    pub fn modify<F>(&mut self, field: &str, f: F) -> Result<(), ProxyError>
    where
        F: FnOnce(Option<Value>) -> Value,
    {
        let current = self.get(field)?;
        self.set(field, f(current))
    }

    /// Append an outbound message to the pending `messages` field.
    pub fn add_message(
        &mut self,
        to: impl Into<Recipient>,
        kind: &str,
        data: Option<Value>,
    ) -> Result<(), ProxyError> {
        let mut outbound: Vec<Message> = match self.get(MESSAGES)? {
            Some(value) => serde_json::from_value(value)?,
            None => Vec::new(),
        };
        outbound.push(Message::new(to, kind, data));
        self.set(MESSAGES, serde_json::to_value(outbound)?)
    }

    /// Number of buffered fields.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Apply every buffered write to the handle, in insertion order.
    ///
    /// Stops at the first rejected field. Writes applied before the failure
    /// stay applied. Returns the number of fields written.
    pub fn flush(self) -> Result<usize, FlushError> {
        let Self { handle, pending } = self;
        let written = pending.len();
        for (field, value) in pending {
            if let Err(source) = handle.set(&field, value.clone()) {
                return Err(FlushError {
                    agent_id: handle.agent_id(),
                    field,
                    value,
                    source: Box::new(source),
                });
            }
        }
        Ok(written)
    }

    fn pending_value(&self, field: &str) -> Option<&Value> {
        self.pending
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::RefCell;

    use hostbridge_types::AgentState;
    use serde_json::json;

    use super::*;
    use crate::host::Release;

    /// Records every `set` call the proxy makes on the host.
    struct Recording {
        state: AgentState,
        sets: RefCell<Vec<String>>,
        reject: Option<&'static str>,
    }

    impl Recording {
        fn new(state: AgentState) -> Self {
            Self {
                state,
                sets: RefCell::new(Vec::new()),
                reject: None,
            }
        }
    }

    impl Release for Recording {
        fn release(&mut self) {}
    }

    impl AgentStateHandle for Recording {
        fn agent_id(&self) -> AgentId {
            self.state.agent_id.clone()
        }

        fn get(&self, field: &str) -> Result<Option<Value>, HostError> {
            Ok(self.state.get(field)?)
        }

        fn set(&mut self, field: &str, value: Value) -> Result<(), HostError> {
            self.sets.borrow_mut().push(field.to_owned());
            if self.reject == Some(field) {
                return Err(HostError::Rejected {
                    field: field.to_owned(),
                    reason: "type mismatch".to_owned(),
                });
            }
            Ok(self.state.set(field, value)?)
        }
    }

    #[test]
    fn writes_are_deferred_until_flush() {
        let mut host = Recording::new(AgentState::new("a"));
        let mut proxy = StateProxy::new(&mut host);
        proxy.set("x", 1).unwrap();
        assert_eq!(proxy.get("x").unwrap(), Some(json!(1)));
        assert_eq!(proxy.pending_len(), 1);
        assert_eq!(proxy.flush().unwrap(), 1);
        assert_eq!(host.sets.borrow().as_slice(), ["x".to_owned()]);
        assert_eq!(host.state.get("x").unwrap(), Some(json!(1)));
    }

    #[test]
    fn handle_untouched_before_flush() {
        let mut host = Recording::new(AgentState::new("a").with_field("x", 0));
        {
            let mut proxy = StateProxy::new(&mut host);
            proxy.set("x", 1).unwrap();
            proxy.modify("y", |_| json!(true)).unwrap();
            // dropped without flushing
        }
        assert!(host.sets.borrow().is_empty());
        assert_eq!(host.state.get("x").unwrap(), Some(json!(0)));
    }

    #[test]
    fn flush_keeps_first_insertion_order() {
        let mut host = Recording::new(AgentState::new("a"));
        let mut proxy = StateProxy::new(&mut host);
        proxy.set("b", 1).unwrap();
        proxy.set("a", 2).unwrap();
        proxy.set("b", 3).unwrap();
        assert_eq!(proxy.flush().unwrap(), 2);
        assert_eq!(
            host.sets.borrow().as_slice(),
            ["b".to_owned(), "a".to_owned()]
        );
        assert_eq!(host.state.get("b").unwrap(), Some(json!(3)));
    }

    #[test]
    fn modify_reads_through_to_host() {
        let mut host = Recording::new(AgentState::new("a").with_field("age", 4));
        let mut proxy = StateProxy::new(&mut host);
        proxy
            .modify("age", |v| {
                json!(v.as_ref().and_then(Value::as_i64).unwrap_or(0).saturating_add(1))
            })
            .unwrap();
        proxy.flush().unwrap();
        assert_eq!(host.state.get("age").unwrap(), Some(json!(5)));
    }

    #[test]
    fn agent_id_is_read_only() {
        let mut host = Recording::new(AgentState::new("a"));
        let mut proxy = StateProxy::new(&mut host);
        assert!(matches!(
            proxy.set("agent_id", "b"),
            Err(ProxyError::ReadOnly { .. })
        ));
    }

    #[test]
    fn flush_error_is_attributable() {
        let mut host = Recording::new(AgentState::new("a"));
        host.reject = Some("color");
        let mut proxy = StateProxy::new(&mut host);
        proxy.set("size", 2).unwrap();
        proxy.set("color", "red").unwrap();
        let err = proxy.flush().unwrap_err();
        assert_eq!(err.agent_id, AgentId::from("a"));
        assert_eq!(err.field, "color");
        assert_eq!(err.value, json!("red"));
        // writes before the failure stay applied
        assert_eq!(host.state.get("size").unwrap(), Some(json!(2)));
    }

    #[test]
    fn add_message_appends_to_pending_messages() {
        let mut host = Recording::new(AgentState::new("a"));
        let mut proxy = StateProxy::new(&mut host);
        proxy.add_message("b", "hello", None).unwrap();
        proxy
            .add_message(Recipient::host(), "stop", Some(json!("done")))
            .unwrap();
        proxy.flush().unwrap();
        assert_eq!(host.state.messages.len(), 2);
        assert!(host.state.messages.iter().any(|m| m.to.is_host()));
    }
}
