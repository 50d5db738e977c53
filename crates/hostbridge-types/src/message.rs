//! Messages exchanged between agents, message handlers, and the host.
//!
//! A message's `to` field is either a single recipient name or a list of
//! names. Recipient names are compared case-insensitively everywhere. The
//! comparison is [`recipient_matches`], and [`recipient_key`] is the folded
//! form used to index messages by recipient.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::ids::AgentId;

/// Reserved recipient name for population-control messages
/// (`create_agent`, `remove_agent`, `stop`).
pub const HOST_SENTINEL: &str = "hash";

/// Message type asking the host to add an agent.
pub const CREATE_AGENT: &str = "create_agent";

/// Message type asking the host to remove an agent.
pub const REMOVE_AGENT: &str = "remove_agent";

/// Message type asking the host to end the run early.
pub const STOP: &str = "stop";

/// Case-insensitive recipient name comparison.
pub fn recipient_matches(name: &str, other: &str) -> bool {
    name.eq_ignore_ascii_case(other)
}

/// Folded recipient name. Two names match exactly when their keys are equal.
pub fn recipient_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Addressee(s) of a [`Message`].
///
/// On the wire this is either a string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum Recipient {
    /// A single recipient: an agent id, agent name, or message handler name.
    Handler(String),
    /// Several recipients; the message is delivered to each of them.
    Many(Vec<String>),
}

impl Recipient {
    /// Address the host sentinel.
    pub fn host() -> Self {
        Self::Handler(HOST_SENTINEL.to_owned())
    }

    /// All recipient names, in declaration order.
    pub fn names(&self) -> &[String] {
        match self {
            Self::Handler(name) => std::slice::from_ref(name),
            Self::Many(names) => names,
        }
    }

    /// Whether `name` is among the recipients (case-insensitive).
    pub fn includes(&self, name: &str) -> bool {
        self.names().iter().any(|n| recipient_matches(n, name))
    }

    /// Whether the host sentinel is among the recipients.
    pub fn is_host(&self) -> bool {
        self.includes(HOST_SENTINEL)
    }
}

impl From<&str> for Recipient {
    fn from(name: &str) -> Self {
        Self::Handler(name.to_owned())
    }
}

impl From<AgentId> for Recipient {
    fn from(id: AgentId) -> Self {
        Self::Handler(id.into_inner())
    }
}

impl From<Vec<String>> for Recipient {
    fn from(names: Vec<String>) -> Self {
        Self::Many(names)
    }
}

/// A message sent by an agent or a message handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Message {
    /// Message type, e.g. `create_agent` or a user-defined type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Addressee(s).
    pub to: Recipient,
    /// Optional payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub data: Option<Value>,
    /// Sender, filled in by the host when the message is routed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub from: Option<AgentId>,
}

impl Message {
    /// Build an unsent message.
    pub fn new(to: impl Into<Recipient>, kind: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            to: to.into(),
            data,
            from: None,
        }
    }

    /// A `create_agent` request addressed to the host.
    pub fn create_agent(payload: Value) -> Self {
        Self::new(Recipient::host(), CREATE_AGENT, Some(payload))
    }

    /// A `remove_agent` request addressed to the host.
    pub fn remove_agent(agent_id: &AgentId) -> Self {
        Self::new(
            Recipient::host(),
            REMOVE_AGENT,
            Some(serde_json::json!({ "agent_id": agent_id })),
        )
    }

    /// A `stop` request addressed to the host.
    pub fn stop(reason: Option<Value>) -> Self {
        Self::new(Recipient::host(), STOP, reason)
    }

    /// Whether this message is of type `kind` and addressed to the host.
    pub fn is_host_kind(&self, kind: &str) -> bool {
        self.kind == kind && self.to.is_host()
    }

    /// Give a `create_agent` payload without an `agent_id` a generated one.
    ///
    /// Returns the id that was assigned, if any. The host and the step cache
    /// both read the id from the payload, so it has to be fixed before either
    /// of them sees the message.
    pub fn assign_created_agent_id(&mut self) -> Option<AgentId> {
        if !self.is_host_kind(CREATE_AGENT) {
            return None;
        }
        let payload = self.data.as_mut()?.as_object_mut()?;
        if payload.get("agent_id").is_some_and(|id| !id.is_null()) {
            return None;
        }
        let id = AgentId::generate();
        payload.insert("agent_id".to_owned(), Value::String(id.as_str().to_owned()));
        Some(id)
    }
}
