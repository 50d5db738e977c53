//! Async message handlers.
//!
//! Unlike behaviors, a message handler does not work on one agent: it gets
//! the shared message-handler state (inbound messages plus the ability to
//! add/remove agents and send messages) and may suspend on I/O. The state
//! is moved into the handler and handed back; the runner wraps what comes
//! back in a [`WrappedState`] for the host to consume.

use std::sync::Arc;

use futures::future::{FutureExt, LocalBoxFuture};
use hostbridge_types::Globals;
use tracing::debug;

use crate::host::MessageHandlerStateHandle;

/// The message-handler state as it travels through a handler.
pub type HandlerState = Box<dyn MessageHandlerStateHandle>;

/// Signature of a message handler body.
pub type HandlerFn =
    dyn Fn(HandlerState, Arc<Globals>) -> LocalBoxFuture<'static, anyhow::Result<HandlerState>>
        + Send
        + Sync;

/// Errors raised by message handlers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler's future resolved to an error.
    #[error("message handler `{name}` rejected: {source}")]
    Rejected {
        /// The handler that failed.
        name: String,
        /// The handler's error.
        source: anyhow::Error,
    },
}

/// A named async message handler.
#[derive(Clone)]
pub struct MessageHandler {
    /// Recipient name messages are addressed to.
    pub name: String,
    handler: Arc<HandlerFn>,
}

impl MessageHandler {
    /// Wrap an async handler body.
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(HandlerState, Arc<Globals>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HandlerState>> + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(move |state: HandlerState, globals: Arc<Globals>| {
                handler(state, globals).boxed_local()
            }),
        }
    }
}

impl std::fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Handler output, ready for the host to take back.
#[must_use = "the host must consume the handler's state"]
pub struct WrappedState {
    handler: String,
    state: HandlerState,
}

impl WrappedState {
    /// The handler that produced this state.
    pub fn handler_name(&self) -> &str {
        &self.handler
    }

    /// Borrow the returned state.
    pub fn state(&self) -> &dyn MessageHandlerStateHandle {
        self.state.as_ref()
    }

    /// Hand the state back to the host.
    pub fn into_inner(self) -> HandlerState {
        self.state
    }
}

impl std::fmt::Debug for WrappedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedState")
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

/// Invokes message handlers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageHandlerRunner;

impl MessageHandlerRunner {
    /// Run `handler` to completion against `state`.
    ///
    /// No timeout is applied; wrap the returned future to add one.
    pub async fn handle(
        handler: &MessageHandler,
        state: HandlerState,
        properties: Arc<Globals>,
    ) -> Result<WrappedState, HandlerError> {
        let inbound = state.get_messages().len();
        debug!(handler = %handler.name, inbound, "Running message handler");
        match (handler.handler)(state, properties).await {
            Ok(state) => Ok(WrappedState {
                handler: handler.name.clone(),
                state,
            }),
            Err(source) => Err(HandlerError::Rejected {
                name: handler.name.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use hostbridge_types::{AgentId, AgentState, Message};

    use super::*;
    use crate::host::HandlerResults;

    struct Recorder {
        inbound: Vec<Message>,
        results: HandlerResults,
    }

    impl MessageHandlerStateHandle for Recorder {
        fn get_messages(&self) -> Vec<Message> {
            self.inbound.clone()
        }

        fn add_agent(&mut self, state: AgentState) {
            self.results.added.push(state);
        }

        fn remove_agent(&mut self, agent_id: AgentId) {
            self.results.removed.push(agent_id);
        }

        fn add_message(&mut self, message: Message) {
            self.results.messages.push(message);
        }

        fn into_results(self: Box<Self>) -> HandlerResults {
            self.results
        }
    }

    fn recorder(inbound: Vec<Message>) -> HandlerState {
        Box::new(Recorder {
            inbound,
            results: HandlerResults::default(),
        })
    }

    #[tokio::test]
    async fn handler_mutations_reach_the_host() {
        let handler = MessageHandler::new("registry", |mut state: HandlerState, _| async move {
            for msg in state.get_messages() {
                if let Some(from) = msg.from {
                    state.remove_agent(from);
                }
            }
            state.add_agent(AgentState::new("fresh"));
            state.add_message(Message::new("fresh", "welcome", None));
            Ok(state)
        });
        let mut inbound = Message::new("registry", "leave", None);
        inbound.from = Some(AgentId::from("old"));

        let wrapped = MessageHandlerRunner::handle(&handler, recorder(vec![inbound]), Arc::default())
            .await
            .unwrap();
        assert_eq!(wrapped.handler_name(), "registry");
        assert_eq!(wrapped.state().get_messages().len(), 1);

        let results = wrapped.into_inner().into_results();
        assert_eq!(results.removed, vec![AgentId::from("old")]);
        assert_eq!(
            results.added.iter().map(|a| a.agent_id.clone()).collect::<Vec<_>>(),
            vec![AgentId::from("fresh")]
        );
        assert_eq!(results.messages.len(), 1);
    }

    #[tokio::test]
    async fn rejection_names_the_handler() {
        let handler = MessageHandler::new("broken", |_state: HandlerState, _| async move {
            anyhow::bail!("upstream unavailable")
        });
        let err = MessageHandlerRunner::handle(&handler, recorder(Vec::new()), Arc::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Rejected { ref name, .. } if name == "broken"));
    }

    #[tokio::test]
    async fn handler_sees_properties() {
        let handler = MessageHandler::new("props", |mut state: HandlerState, globals| async move {
            let limit = globals.get("limit").cloned();
            state.add_message(Message::new("x", "limit", limit));
            Ok(state)
        });
        let mut globals = Globals::new();
        globals.insert("limit".to_owned(), serde_json::json!(9));
        let results = MessageHandlerRunner::handle(&handler, recorder(Vec::new()), Arc::new(globals))
            .await
            .unwrap()
            .into_inner()
            .into_results();
        assert_eq!(
            results.messages.first().and_then(|m| m.data.clone()),
            Some(serde_json::json!(9))
        );
    }
}
