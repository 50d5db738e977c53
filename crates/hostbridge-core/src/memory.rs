//! In-process host: handles backed by plain memory.
//!
//! The step driver uses these handles to run behaviors and message handlers
//! against a `Vec<AgentState>` population. Everything here is
//! single-threaded (`Rc`/`RefCell`), matching the cooperative scheduling of
//! the driver.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use hostbridge_types::agent::AGENT_ID;
use hostbridge_types::{AgentId, AgentState, Message};
use serde_json::Value;

use crate::host::{
    AgentStateHandle, ContextHandle, HandlerResults, HostError, MessageHandlerStateHandle, Release,
};

/// Agent field holding a position as `[x, y, z]` (missing axes are 0).
pub const POSITION: &str = "position";

/// Agent field overriding the topology's neighbor search radius.
pub const SEARCH_RADIUS: &str = "search_radius";

/// Release and write counters shared by every handle of one host.
#[derive(Debug, Clone, Default)]
pub struct HandleStats {
    releases: Rc<Cell<u64>>,
    writes: Rc<Cell<u64>>,
}

impl HandleStats {
    /// Fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles released so far.
    pub fn releases(&self) -> u64 {
        self.releases.get()
    }

    /// Field writes accepted so far.
    pub fn writes(&self) -> u64 {
        self.writes.get()
    }

    fn record_release(&self) {
        self.releases.set(self.releases.get().saturating_add(1));
    }

    fn record_write(&self) {
        self.writes.set(self.writes.get().saturating_add(1));
    }
}

/// Agent-state handle over a shared agent slot.
#[derive(Debug)]
pub struct MemoryAgentHandle {
    slot: Rc<RefCell<AgentState>>,
    stats: HandleStats,
}

impl MemoryAgentHandle {
    /// Hand out a view of `slot`.
    pub const fn new(slot: Rc<RefCell<AgentState>>, stats: HandleStats) -> Self {
        Self { slot, stats }
    }
}

impl Release for MemoryAgentHandle {
    fn release(&mut self) {
        self.stats.record_release();
    }
}

impl AgentStateHandle for MemoryAgentHandle {
    fn agent_id(&self) -> AgentId {
        self.slot.borrow().agent_id.clone()
    }

    fn get(&self, field: &str) -> Result<Option<Value>, HostError> {
        Ok(self.slot.borrow().get(field)?)
    }

    fn set(&mut self, field: &str, value: Value) -> Result<(), HostError> {
        let mut agent = self.slot.borrow_mut();
        if field == AGENT_ID && value.as_str() != Some(agent.agent_id.as_str()) {
            return Err(HostError::Rejected {
                field: field.to_owned(),
                reason: "agent ids cannot change".to_owned(),
            });
        }
        agent.set(field, value)?;
        self.stats.record_write();
        Ok(())
    }
}

/// Context handle with messages and neighbor ids computed up front.
#[derive(Debug)]
pub struct MemoryContextHandle {
    messages: Vec<Message>,
    neighbor_ids: Vec<AgentId>,
    stats: HandleStats,
}

impl MemoryContextHandle {
    /// Package one invocation's inputs.
    pub const fn new(messages: Vec<Message>, neighbor_ids: Vec<AgentId>, stats: HandleStats) -> Self {
        Self {
            messages,
            neighbor_ids,
            stats,
        }
    }
}

impl Release for MemoryContextHandle {
    fn release(&mut self) {
        self.stats.record_release();
    }
}

impl ContextHandle for MemoryContextHandle {
    fn messages(&self) -> Result<Vec<Message>, HostError> {
        Ok(self.messages.clone())
    }

    fn neighbor_ids(&self) -> Result<Vec<AgentId>, HostError> {
        Ok(self.neighbor_ids.clone())
    }
}

/// Message-handler state that records requests into [`HandlerResults`].
#[derive(Debug)]
pub struct MemoryHandlerState {
    handler: AgentId,
    inbound: Vec<Message>,
    results: HandlerResults,
}

impl MemoryHandlerState {
    /// State for handler `name` with its inbound messages.
    ///
    /// Messages the handler sends are stamped as coming from `name`.
    pub fn new(name: &str, inbound: Vec<Message>) -> Self {
        Self {
            handler: AgentId::from(name),
            inbound,
            results: HandlerResults::default(),
        }
    }
}

impl MessageHandlerStateHandle for MemoryHandlerState {
    fn get_messages(&self) -> Vec<Message> {
        self.inbound.clone()
    }

    fn add_agent(&mut self, state: AgentState) {
        self.results.added.push(state);
    }

    fn remove_agent(&mut self, agent_id: AgentId) {
        self.results.removed.push(agent_id);
    }

    fn add_message(&mut self, mut message: Message) {
        if message.from.is_none() {
            message.from = Some(self.handler.clone());
        }
        self.results.messages.push(message);
    }

    fn into_results(self: Box<Self>) -> HandlerResults {
        self.results
    }
}

/// An agent's `position` field as a 3-vector.
pub fn position(agent: &AgentState) -> Option<[f64; 3]> {
    let coords = agent.fields.get(POSITION)?.as_array()?;
    if coords.is_empty() {
        return None;
    }
    let mut point = [0.0; 3];
    for (axis, value) in point.iter_mut().zip(coords) {
        *axis = value.as_f64()?;
    }
    Some(point)
}

/// Ids of agents within the agent's search radius, in population order.
///
/// The radius is the agent's own `search_radius` field, else
/// `default_radius`. No radius or no position means no neighbors. An agent
/// is never its own neighbor.
pub fn neighbor_ids(
    population: &[AgentState],
    agent: &AgentState,
    default_radius: Option<f64>,
) -> Vec<AgentId> {
    let radius = agent
        .fields
        .get(SEARCH_RADIUS)
        .and_then(Value::as_f64)
        .or(default_radius);
    let (Some(radius), Some(origin)) = (radius, position(agent)) else {
        return Vec::new();
    };

    population
        .iter()
        .filter(|other| other.agent_id != agent.agent_id)
        .filter(|other| position(other).is_some_and(|p| distance(origin, p) <= radius))
        .map(|other| other.agent_id.clone())
        .collect()
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}
