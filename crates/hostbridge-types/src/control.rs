//! Population-control messages addressed to the host sentinel.
//!
//! Control messages travel inside ordinary [`Message`] values. Decoding is
//! shared by the host (which applies them to the population) and the step
//! cache (which mirrors them), so both read payloads identically.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::agent::AgentState;
use crate::ids::AgentId;
use crate::message::{CREATE_AGENT, Message, REMOVE_AGENT, STOP};

/// Errors that can occur when decoding a control message payload.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// A `create_agent` payload carried no `agent_id`.
    #[error("create_agent payload has no agent_id")]
    MissingAgentId,

    /// The payload did not match the shape the message type requires.
    #[error("malformed {kind} payload: {source}")]
    Payload {
        /// The message type being decoded.
        kind: String,
        /// The underlying decode error.
        source: serde_json::Error,
    },
}

/// A request to end the run early, captured from a `stop` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StopSignal {
    /// The agent that asked to stop, when known.
    #[ts(optional)]
    pub from: Option<AgentId>,
    /// The stop reason as sent.
    #[ts(optional)]
    pub data: Option<Value>,
}

/// A decoded message to the host sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Add this agent to the population.
    CreateAgent(Box<AgentState>),
    /// Remove this agent from the population.
    RemoveAgent(AgentId),
    /// End the run.
    Stop(StopSignal),
}

#[derive(Deserialize)]
struct RemovePayload {
    #[serde(default)]
    agent_id: Option<AgentId>,
}

impl ControlMessage {
    /// Decode `message`, sent by `sender`, as a control message.
    ///
    /// Returns `Ok(None)` for messages that are not addressed to the host or
    /// whose type is not a control type. A `remove_agent` without a target id
    /// removes the sender.
    pub fn decode(message: &Message, sender: &AgentId) -> Result<Option<Self>, ControlError> {
        if !message.to.is_host() {
            return Ok(None);
        }
        let decoded = match message.kind.as_str() {
            CREATE_AGENT => {
                let payload = message.data.clone().unwrap_or(Value::Null);
                if payload.get("agent_id").is_none_or(Value::is_null) {
                    return Err(ControlError::MissingAgentId);
                }
                let state: AgentState =
                    serde_json::from_value(payload).map_err(|source| ControlError::Payload {
                        kind: CREATE_AGENT.to_owned(),
                        source,
                    })?;
                Self::CreateAgent(Box::new(state))
            }
            REMOVE_AGENT => {
                let target = match &message.data {
                    None | Some(Value::Null) => None,
                    Some(data) => {
                        let payload: RemovePayload = serde_json::from_value(data.clone())
                            .map_err(|source| ControlError::Payload {
                                kind: REMOVE_AGENT.to_owned(),
                                source,
                            })?;
                        payload.agent_id
                    }
                };
                Self::RemoveAgent(target.unwrap_or_else(|| sender.clone()))
            }
            STOP => Self::Stop(StopSignal {
                from: Some(sender.clone()),
                data: message.data.clone(),
            }),
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sender() -> AgentId {
        AgentId::from("parent")
    }

    #[test]
    fn create_agent_uses_payload_id_not_sender() {
        let msg = Message::create_agent(json!({"agent_id": "child", "position": [0, 0, 2]}));
        let decoded = ControlMessage::decode(&msg, &sender()).unwrap();
        assert!(matches!(
            &decoded,
            Some(ControlMessage::CreateAgent(state))
                if state.agent_id == AgentId::from("child")
                    && state.fields.get("position") == Some(&json!([0, 0, 2]))
        ));
    }

    #[test]
    fn create_agent_without_id_is_rejected() {
        let msg = Message::create_agent(json!({"position": [0, 0, 2]}));
        assert!(matches!(
            ControlMessage::decode(&msg, &sender()),
            Err(ControlError::MissingAgentId)
        ));
    }

    #[test]
    fn bare_remove_agent_targets_sender() {
        let msg = Message::new(crate::Recipient::host(), REMOVE_AGENT, None);
        let decoded = ControlMessage::decode(&msg, &sender()).unwrap();
        assert_eq!(decoded, Some(ControlMessage::RemoveAgent(sender())));
    }

    #[test]
    fn remove_agent_with_target() {
        let msg = Message::remove_agent(&AgentId::from("xyz"));
        let decoded = ControlMessage::decode(&msg, &sender()).unwrap();
        assert_eq!(decoded, Some(ControlMessage::RemoveAgent(AgentId::from("xyz"))));
    }

    #[test]
    fn sentinel_match_is_case_insensitive() {
        let mut msg = Message::stop(Some(json!("done")));
        msg.to = crate::Recipient::Many(vec!["HASH".to_owned()]);
        let decoded = ControlMessage::decode(&msg, &sender()).unwrap();
        assert!(matches!(decoded, Some(ControlMessage::Stop(_))));
    }

    #[test]
    fn non_control_messages_are_ignored() {
        let to_agent = Message::new("bob", STOP, None);
        let unknown = Message::new(crate::Recipient::host(), "teleport", None);
        assert!(ControlMessage::decode(&to_agent, &sender()).unwrap().is_none());
        assert!(ControlMessage::decode(&unknown, &sender()).unwrap().is_none());
    }
}
