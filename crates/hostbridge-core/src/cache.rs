//! Per-step agent cache backing neighbor lookups.
//!
//! Crossing the host boundary is expensive, so once per step the driver
//! hands the whole population to [`StepCache::advance_step`], and every
//! neighbor lookup during that step is served from the cache.
//!
//! # Invariants
//!
//! - The step counter is its own field; it can never be confused with an
//!   agent id.
//! - After `advance_step` returns `Ok`, every entry is stamped with the
//!   current step. A lookup that finds any other stamp is a driver ordering
//!   bug and fails with [`CacheError::Stale`].

use std::collections::{BTreeMap, BTreeSet};

use hostbridge_types::{AgentId, AgentState, ControlError, ControlMessage, StopSignal};
use tracing::debug;

/// Errors raised by the step cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No entry exists for the requested agent.
    #[error("agent {agent_id} is not in the step cache")]
    NotFound {
        /// The requested agent.
        agent_id: AgentId,
    },

    /// The entry exists but was stamped at a different step.
    #[error("agent {agent_id} is stale: cached at step {cached_step}, cache is at step {current_step}")]
    Stale {
        /// The requested agent.
        agent_id: AgentId,
        /// The step the entry was stamped with.
        cached_step: u64,
        /// The cache's current step.
        current_step: u64,
    },

    /// The step counter would overflow.
    #[error("step counter overflow: cannot advance beyond u64::MAX")]
    StepOverflow,

    /// A control message in the population could not be decoded.
    #[error("malformed control message from {from}: {source}")]
    MalformedControl {
        /// The agent that sent it.
        from: AgentId,
        /// The decode failure.
        source: ControlError,
    },
}

/// An agent state together with the step it was last known valid at.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAgentState {
    /// The cached state.
    pub state: AgentState,
    /// The step this copy is valid for.
    pub step: u64,
}

/// The step-coherent agent cache.
#[derive(Debug, Clone, Default)]
pub struct StepCache {
    current_step: u64,
    agents: BTreeMap<AgentId, CachedAgentState>,
}

/// Control messages found in one pass over the population.
#[derive(Default)]
struct ControlScan {
    created: Vec<AgentState>,
    removed: BTreeSet<AgentId>,
    stop: Option<StopSignal>,
}

impl StepCache {
    /// An empty cache at step 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a cache from explicit entries (restoration and diagnostics).
    ///
    /// Entries keep their own stamps, so a cache built this way can hold
    /// stale entries.
    pub fn from_parts(
        current_step: u64,
        entries: impl IntoIterator<Item = CachedAgentState>,
    ) -> Self {
        let agents = entries
            .into_iter()
            .map(|entry| (entry.state.agent_id.clone(), entry))
            .collect();
        Self {
            current_step,
            agents,
        }
    }

    /// The step the cache is coherent with.
    pub const fn current_step(&self) -> u64 {
        self.current_step
    }

    /// Number of cached agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the cache holds no agents.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// The raw entry for an agent, whatever its stamp.
    pub fn get(&self, agent_id: &AgentId) -> Option<&CachedAgentState> {
        self.agents.get(agent_id)
    }

    /// Iterate over all entries in id order.
    pub fn entries(&self) -> impl Iterator<Item = &CachedAgentState> {
        self.agents.values()
    }

    /// Move the cache to the next step using the host's full population.
    ///
    /// Applies `create_agent` / `remove_agent` messages addressed to the host
    /// sentinel, restamps every agent in `population`, evicts agents that
    /// were not observed, and returns the first `stop` message found. Which
    /// `stop` is "first" follows population order; no ordering across agents
    /// is promised.
    ///
    /// On error the cache is left unchanged.
    pub fn advance_step(
        &mut self,
        population: &[AgentState],
    ) -> Result<Option<StopSignal>, CacheError> {
        let scan = scan_controls(population)?;
        let step = self
            .current_step
            .checked_add(1)
            .ok_or(CacheError::StepOverflow)?;

        let created = scan.created.len();
        for state in scan.created {
            self.upsert(state, step);
        }
        for state in population {
            self.upsert(state.clone(), step);
        }
        for agent_id in &scan.removed {
            self.agents.remove(agent_id);
        }

        let before_evict = self.agents.len();
        self.agents.retain(|_, entry| entry.step == step);
        let evicted = before_evict.saturating_sub(self.agents.len());

        self.current_step = step;
        debug!(
            step,
            agents = self.agents.len(),
            created,
            removed = scan.removed.len(),
            evicted,
            stop = scan.stop.is_some(),
            "Step cache advanced"
        );
        Ok(scan.stop)
    }

    /// Resolve one agent for the current step.
    pub fn resolve(&self, agent_id: &AgentId) -> Result<&AgentState, CacheError> {
        let entry = self
            .agents
            .get(agent_id)
            .ok_or_else(|| CacheError::NotFound {
                agent_id: agent_id.clone(),
            })?;
        if entry.step != self.current_step {
            return Err(CacheError::Stale {
                agent_id: agent_id.clone(),
                cached_step: entry.step,
                current_step: self.current_step,
            });
        }
        Ok(&entry.state)
    }

    /// Resolve a list of neighbors for the current step, in request order.
    pub fn resolve_neighbors(&self, ids: &[AgentId]) -> Result<Vec<AgentState>, CacheError> {
        ids.iter()
            .map(|id| self.resolve(id).cloned())
            .collect()
    }

    fn upsert(&mut self, state: AgentState, step: u64) {
        self.agents
            .insert(state.agent_id.clone(), CachedAgentState { state, step });
    }
}

fn scan_controls(population: &[AgentState]) -> Result<ControlScan, CacheError> {
    let mut scan = ControlScan::default();
    for agent in population {
        for message in &agent.messages {
            let decoded = ControlMessage::decode(message, &agent.agent_id).map_err(|source| {
                CacheError::MalformedControl {
                    from: agent.agent_id.clone(),
                    source,
                }
            })?;
            match decoded {
                Some(ControlMessage::CreateAgent(state)) => scan.created.push(*state),
                Some(ControlMessage::RemoveAgent(target)) => {
                    scan.removed.insert(target);
                }
                Some(ControlMessage::Stop(signal)) => {
                    if scan.stop.is_none() {
                        scan.stop = Some(signal);
                    }
                }
                None => {}
            }
        }
    }
    Ok(scan)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use hostbridge_types::Message;
    use serde_json::json;

    use super::*;

    fn agent(id: &str) -> AgentState {
        AgentState::new(id)
    }

    fn ids(names: &[&str]) -> Vec<AgentId> {
        names.iter().map(|n| AgentId::from(*n)).collect()
    }

    #[test]
    fn observed_agents_resolve_at_current_step() {
        let mut cache = StepCache::new();
        cache.advance_step(&[agent("a"), agent("b")]).unwrap();
        assert_eq!(cache.current_step(), 1);
        let resolved = cache.resolve_neighbors(&ids(&["b", "a"])).unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(cache.entries().all(|e| e.step == 1));
    }

    #[test]
    fn unobserved_agents_drop_out() {
        let mut cache = StepCache::new();
        cache.advance_step(&[agent("a"), agent("b")]).unwrap();
        cache.advance_step(&[agent("a")]).unwrap();
        assert!(matches!(
            cache.resolve(&AgentId::from("b")),
            Err(CacheError::NotFound { .. })
        ));
        assert!(cache.resolve(&AgentId::from("a")).is_ok());
    }

    #[test]
    fn stale_entry_is_a_hard_error() {
        let cache = StepCache::from_parts(
            2,
            [CachedAgentState {
                state: agent("old"),
                step: 1,
            }],
        );
        let err = cache.resolve_neighbors(&ids(&["old"])).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Stale {
                cached_step: 1,
                current_step: 2,
                ..
            }
        ));
    }

    #[test]
    fn create_agent_is_keyed_by_payload_id() {
        let mut parent = agent("parent");
        parent
            .messages
            .push(Message::create_agent(json!({"agent_id": "child", "position": [0, 0, 2]})));
        let mut cache = StepCache::new();
        cache.advance_step(&[parent]).unwrap();
        let child = cache.resolve(&AgentId::from("child")).unwrap();
        assert_eq!(child.fields.get("position"), Some(&json!([0, 0, 2])));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn remove_agent_deletes_even_if_observed() {
        let mut killer = agent("k");
        killer.messages.push(Message::remove_agent(&AgentId::from("v")));
        let mut cache = StepCache::new();
        cache.advance_step(&[killer, agent("v")]).unwrap();
        assert!(cache.get(&AgentId::from("v")).is_none());
        assert!(cache.get(&AgentId::from("k")).is_some());
    }

    #[test]
    fn first_stop_wins() {
        let mut a = agent("a");
        a.messages.push(Message::stop(Some(json!("first"))));
        let mut b = agent("b");
        b.messages.push(Message::stop(Some(json!("second"))));
        let mut cache = StepCache::new();
        let stop = cache.advance_step(&[a, b]).unwrap().unwrap();
        assert_eq!(stop.data, Some(json!("first")));
        assert_eq!(stop.from, Some(AgentId::from("a")));
    }

    #[test]
    fn malformed_control_leaves_cache_untouched() {
        let mut bad = agent("bad");
        bad.messages.push(Message::create_agent(json!({"position": 1})));
        let mut cache = StepCache::new();
        cache.advance_step(&[agent("a")]).unwrap();
        assert!(matches!(
            cache.advance_step(&[bad]),
            Err(CacheError::MalformedControl { .. })
        ));
        assert_eq!(cache.current_step(), 1);
        assert!(cache.resolve(&AgentId::from("a")).is_ok());
    }

    #[test]
    fn counter_overflow_is_reported() {
        let mut cache = StepCache::from_parts(u64::MAX, []);
        assert!(matches!(
            cache.advance_step(&[]),
            Err(CacheError::StepOverflow)
        ));
    }
}
