//! Delivery of outbound messages to their recipients.
//!
//! Recipient names are folded once, when a message is routed, and every
//! lookup folds its key the same way. Routing is also where a `create_agent`
//! payload without an id gets one, whoever sent it, so the host and the
//! step cache read the same id.

use std::collections::{BTreeMap, BTreeSet};

use hostbridge_types::{AgentState, Message, recipient_key, recipient_matches};
use tracing::debug;

/// Messages indexed by lower-cased recipient name.
#[derive(Debug, Clone, Default)]
pub struct MessageMap {
    by_recipient: BTreeMap<String, Vec<Message>>,
}

impl MessageMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every outbound message in `population`, stamping the sender.
    pub fn collect(population: &[AgentState]) -> Self {
        let mut map = Self::new();
        for agent in population {
            for message in &agent.messages {
                let mut message = message.clone();
                message.from = Some(agent.agent_id.clone());
                map.route(message);
            }
        }
        map
    }

    /// Deliver one message to each of its recipients.
    ///
    /// A name listed twice (in any casing) receives the message once.
    pub fn route(&mut self, mut message: Message) {
        if let Some(agent_id) = message.assign_created_agent_id() {
            debug!(%agent_id, from = ?message.from, "Assigned id to created agent");
        }
        let keys: BTreeSet<String> = message
            .to
            .names()
            .iter()
            .map(String::as_str)
            .map(recipient_key)
            .collect();
        for key in keys {
            self.by_recipient
                .entry(key)
                .or_default()
                .push(message.clone());
        }
    }

    /// Messages addressed to `name`.
    pub fn for_recipient(&self, name: &str) -> &[Message] {
        self.by_recipient
            .get(&recipient_key(name))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Messages addressed to the agent's id or to its name.
    pub fn for_agent(&self, agent: &AgentState) -> Vec<Message> {
        let mut inbox = self.for_recipient(agent.agent_id.as_str()).to_vec();
        if let Some(name) = agent.agent_name.as_deref()
            && !recipient_matches(agent.agent_id.as_str(), name)
        {
            inbox.extend(
                self.for_recipient(name)
                    .iter()
                    .filter(|m| !m.to.includes(agent.agent_id.as_str()))
                    .cloned(),
            );
        }
        inbox
    }

    /// Every recipient with at least one message, lower-cased.
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.by_recipient.keys().map(String::as_str)
    }

    /// Total deliveries (a message to two recipients counts twice).
    pub fn len(&self) -> usize {
        self.by_recipient.values().map(Vec::len).sum()
    }

    /// Whether nothing was delivered.
    pub fn is_empty(&self) -> bool {
        self.by_recipient.is_empty()
    }
}
