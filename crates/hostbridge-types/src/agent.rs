//! Agent state as seen by both the host and behavior scripts.
//!
//! `AgentState` has four built-in fields plus an open map of user fields.
//! Field access by name ([`AgentState::get`], [`AgentState::set`]) is what
//! the host exposes to scripts, so built-in fields are type-checked on write
//! while user fields accept any JSON value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::AgentId;
use crate::message::Message;

/// Built-in field: the agent's identifier.
pub const AGENT_ID: &str = "agent_id";
/// Built-in field: the agent's optional display name.
pub const AGENT_NAME: &str = "agent_name";
/// Built-in field: outbound messages.
pub const MESSAGES: &str = "messages";
/// Built-in field: behavior names to run this step.
pub const BEHAVIORS: &str = "behaviors";

/// Errors raised by field-level access to an [`AgentState`].
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    /// The value has the wrong JSON type for a built-in field.
    #[error("field `{field}` expects {expected}")]
    TypeMismatch {
        /// The field that was written.
        field: String,
        /// Human-readable description of the accepted type.
        expected: &'static str,
    },

    /// The value could not be converted to or from the field's type.
    #[error("field `{field}` could not be converted: {source}")]
    Conversion {
        /// The field that was accessed.
        field: String,
        /// The underlying conversion error.
        source: serde_json::Error,
    },
}

/// The state of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Unique identifier within a step.
    pub agent_id: AgentId,

    /// Optional human-readable name; messages can be addressed to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,

    /// Outbound messages produced by this agent's behaviors last step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,

    /// Ordered behavior names to run on this agent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub behaviors: Vec<String>,

    /// Every other field.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl AgentState {
    /// Create an agent with no name, messages, behaviors, or extra fields.
    pub fn new(agent_id: impl Into<AgentId>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: None,
            messages: Vec::new(),
            behaviors: Vec::new(),
            fields: Map::new(),
        }
    }

    /// Builder-style setter for a user field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Builder-style setter for the behavior list.
    #[must_use]
    pub fn with_behaviors<I, S>(mut self, behaviors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.behaviors = behaviors.into_iter().map(Into::into).collect();
        self
    }

    /// Read a field by name as JSON. Absent user fields yield `None`.
    pub fn get(&self, field: &str) -> Result<Option<Value>, FieldError> {
        let value = match field {
            AGENT_ID => Some(Value::String(self.agent_id.as_str().to_owned())),
            AGENT_NAME => self.agent_name.clone().map(Value::String),
            MESSAGES => Some(to_json(field, &self.messages)?),
            BEHAVIORS => Some(to_json(field, &self.behaviors)?),
            other => self.fields.get(other).cloned(),
        };
        Ok(value)
    }

    /// Write a field by name. Built-in fields are type-checked.
    pub fn set(&mut self, field: &str, value: Value) -> Result<(), FieldError> {
        match field {
            AGENT_ID => match value {
                Value::String(id) => self.agent_id = AgentId::from(id),
                _ => return Err(mismatch(field, "a string")),
            },
            AGENT_NAME => match value {
                Value::String(name) => self.agent_name = Some(name),
                Value::Null => self.agent_name = None,
                _ => return Err(mismatch(field, "a string or null")),
            },
            MESSAGES => {
                if !value.is_array() {
                    return Err(mismatch(field, "an array of messages"));
                }
                self.messages = from_json(field, value)?;
            }
            BEHAVIORS => {
                if !value.is_array() {
                    return Err(mismatch(field, "an array of behavior names"));
                }
                self.behaviors = from_json(field, value)?;
            }
            other => {
                self.fields.insert(other.to_owned(), value);
            }
        }
        Ok(())
    }

    /// Whether the field is present (built-ins count when non-empty).
    pub fn has(&self, field: &str) -> bool {
        match field {
            AGENT_ID => true,
            AGENT_NAME => self.agent_name.is_some(),
            MESSAGES => !self.messages.is_empty(),
            BEHAVIORS => !self.behaviors.is_empty(),
            other => self.fields.contains_key(other),
        }
    }
}

fn mismatch(field: &str, expected: &'static str) -> FieldError {
    FieldError::TypeMismatch {
        field: field.to_owned(),
        expected,
    }
}

fn to_json<T: Serialize>(field: &str, value: &T) -> Result<Value, FieldError> {
    serde_json::to_value(value).map_err(|source| FieldError::Conversion {
        field: field.to_owned(),
        source,
    })
}

fn from_json<T: serde::de::DeserializeOwned>(field: &str, value: Value) -> Result<T, FieldError> {
    serde_json::from_value(value).map_err(|source| FieldError::Conversion {
        field: field.to_owned(),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extra_fields_are_flattened() {
        let agent: AgentState = serde_json::from_value(json!({
            "agent_id": "a",
            "position": [1, 2, 0],
            "behaviors": ["move"],
        }))
        .unwrap();
        assert_eq!(agent.behaviors, vec!["move".to_owned()]);
        assert_eq!(agent.fields.get("position"), Some(&json!([1, 2, 0])));
        assert!(!agent.fields.contains_key("agent_id"));
    }

    #[test]
    fn builtin_fields_are_type_checked() {
        let mut agent = AgentState::new("a");
        assert!(matches!(
            agent.set(AGENT_ID, json!(5)),
            Err(FieldError::TypeMismatch { .. })
        ));
        assert!(matches!(
            agent.set(BEHAVIORS, json!("move")),
            Err(FieldError::TypeMismatch { .. })
        ));
        assert!(matches!(
            agent.set(MESSAGES, json!([{"to": "b"}])),
            Err(FieldError::Conversion { .. })
        ));
    }

    #[test]
    fn get_and_set_round_trip_user_fields() {
        let mut agent = AgentState::new("a");
        assert_eq!(agent.get("energy").unwrap(), None);
        agent.set("energy", json!(10)).unwrap();
        assert_eq!(agent.get("energy").unwrap(), Some(json!(10)));
        assert!(agent.has("energy"));
    }

    #[test]
    fn messages_are_readable_as_json() {
        let mut agent = AgentState::new("a");
        agent
            .set(MESSAGES, json!([{"type": "hi", "to": ["b", "c"]}]))
            .unwrap();
        assert_eq!(agent.messages.len(), 1);
        let value = agent.get(MESSAGES).unwrap().unwrap();
        assert_eq!(value, json!([{"type": "hi", "to": ["b", "c"]}]));
    }
}
