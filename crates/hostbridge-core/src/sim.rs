//! The step driver: owns the population and runs every phase of a step.
//!
//! # Phases
//!
//! 1. Route last step's outbound messages and clear them from the agents.
//!    Routing gives `create_agent` payloads without an id a generated one.
//! 2. Message handlers with inbound messages run, in registration order.
//!    Their messages are routed the same way.
//! 3. Control messages to the host sentinel are applied to the population.
//! 4. The step cache advances. A `stop` message ends the step here.
//! 5. Each agent's behaviors run in list order against fresh handles.
//!
//! Outbound messages are delivered at most once: a step that fails after
//! routing does not deliver them again.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hostbridge_types::{
    AgentId, AgentState, ControlError, ControlMessage, Datasets, Globals, HOST_SENTINEL,
    InitContext, Message, StopSignal,
};
use tracing::{debug, info, warn};

use crate::behavior::{BehaviorError, BehaviorRegistry, BehaviorRunner};
use crate::cache::{CacheError, StepCache};
use crate::config::TopologyConfig;
use crate::handler::{HandlerError, HandlerState, MessageHandler, MessageHandlerRunner};
use crate::host::HostHandle;
use crate::init::{InitError, InitSource};
use crate::memory::{
    HandleStats, MemoryAgentHandle, MemoryContextHandle, MemoryHandlerState, neighbor_ids,
};
use crate::routing::MessageMap;

/// Errors that abort a step or a run.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// The step cache could not advance.
    #[error("step cache error: {source}")]
    Cache {
        /// The underlying cache error.
        #[from]
        source: CacheError,
    },

    /// A behavior failed or was not registered.
    #[error("behavior error: {source}")]
    Behavior {
        /// The underlying behavior error.
        source: Box<BehaviorError>,
    },

    /// A message handler rejected.
    #[error("message handler error: {source}")]
    Handler {
        /// The underlying handler error.
        #[from]
        source: HandlerError,
    },

    /// The initial population could not be built.
    #[error("initialization error: {source}")]
    Init {
        /// The underlying initializer error.
        #[from]
        source: InitError,
    },

    /// A message to the host sentinel could not be decoded.
    #[error("malformed control message from {from}: {source}")]
    MalformedControl {
        /// The sender.
        from: AgentId,
        /// The decode failure.
        source: ControlError,
    },
}

impl From<BehaviorError> for StepError {
    fn from(source: BehaviorError) -> Self {
        Self::Behavior {
            source: Box::new(source),
        }
    }
}

/// Summary of a single step's execution.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSummary {
    /// The step number that was executed.
    pub step: u64,
    /// Agents in the population at the end of the step.
    pub agents: usize,
    /// Agents added by handlers and `create_agent` messages.
    pub created: usize,
    /// Agents removed by handlers and `remove_agent` messages.
    pub removed: usize,
    /// Message handlers that ran.
    pub handlers_run: usize,
    /// Behavior invocations.
    pub behaviors_run: usize,
    /// The stop request that ended this step early, if any.
    pub stop: Option<StopSignal>,
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEndReason {
    /// The step limit was reached.
    MaxStepsReached,
    /// An agent or handler sent `stop` to the host.
    Stopped {
        /// The stop request.
        signal: StopSignal,
    },
}

/// Result of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// The reason the run ended.
    pub end_reason: RunEndReason,
    /// The last step summary, if any step ran.
    pub final_summary: Option<StepSummary>,
    /// Steps executed by this run.
    pub total_steps: u64,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended.
    pub finished_at: DateTime<Utc>,
}

/// Population-level changes made during a step.
#[derive(Default)]
struct Changes {
    created: usize,
    removed: usize,
}

/// A step-driven simulation over an in-memory population.
pub struct Simulation {
    population: Vec<AgentState>,
    cache: StepCache,
    behaviors: BehaviorRegistry,
    handlers: Vec<MessageHandler>,
    globals: Arc<Globals>,
    datasets: Arc<Datasets>,
    topology: TopologyConfig,
    stats: HandleStats,
}

impl Simulation {
    /// A simulation over `population` with no handlers, globals, or datasets.
    pub fn new(population: Vec<AgentState>, behaviors: BehaviorRegistry) -> Self {
        for (behavior, dependency) in behaviors.missing_dependencies() {
            warn!(%behavior, %dependency, "Behavior dependency is not registered");
        }
        Self {
            population,
            cache: StepCache::new(),
            behaviors,
            handlers: Vec::new(),
            globals: Arc::default(),
            datasets: Arc::default(),
            topology: TopologyConfig::default(),
            stats: HandleStats::new(),
        }
    }

    /// Build the initial population from `source`, then wrap it.
    ///
    /// The context's globals and datasets become the simulation's.
    pub fn initialize(
        source: &InitSource,
        context: InitContext,
        behaviors: BehaviorRegistry,
    ) -> Result<Self, StepError> {
        let population = source.load(&context)?;
        info!(agents = population.len(), "Initial population loaded");
        let (globals, datasets) = context.into_parts();
        Ok(Self::new(population, behaviors)
            .with_globals(globals)
            .with_datasets(datasets))
    }

    /// Register a message handler.
    #[must_use]
    pub fn with_handler(mut self, handler: MessageHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Replace the global properties.
    #[must_use]
    pub fn with_globals(mut self, globals: Arc<Globals>) -> Self {
        self.globals = globals;
        self
    }

    /// Replace the datasets.
    #[must_use]
    pub fn with_datasets(mut self, datasets: Arc<Datasets>) -> Self {
        self.datasets = datasets;
        self
    }

    /// Set neighbor search parameters.
    #[must_use]
    pub fn with_topology(mut self, topology: TopologyConfig) -> Self {
        self.topology = topology;
        self
    }

    /// Swap global properties wholesale. Takes effect next step.
    pub fn update_globals(&mut self, globals: Globals) {
        self.globals = Arc::new(globals);
    }

    /// The current population.
    pub fn population(&self) -> &[AgentState] {
        &self.population
    }

    /// The step cache.
    pub const fn cache(&self) -> &StepCache {
        &self.cache
    }

    /// Global properties.
    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    /// Handle release and write counters.
    pub const fn stats(&self) -> &HandleStats {
        &self.stats
    }

    /// The last step that ran (0 before the first step).
    pub const fn current_step(&self) -> u64 {
        self.cache.current_step()
    }

    /// Run one step.
    pub async fn step(&mut self) -> Result<StepSummary, StepError> {
        let mut routed = MessageMap::collect(&self.population);
        for agent in &mut self.population {
            agent.messages.clear();
        }
        debug!(deliveries = routed.len(), "Routed outbound messages");
        let mut changes = Changes::default();

        let mut handlers_run: usize = 0;
        for handler in &self.handlers {
            let inbound = routed.for_recipient(&handler.name).to_vec();
            if inbound.is_empty() {
                continue;
            }
            let state: HandlerState = Box::new(MemoryHandlerState::new(&handler.name, inbound));
            let wrapped =
                MessageHandlerRunner::handle(handler, state, Arc::clone(&self.globals)).await?;
            let results = wrapped.into_inner().into_results();
            if results.is_empty() {
                debug!(handler = %handler.name, "Handler requested no changes");
            }
            for agent_id in &results.removed {
                changes.removed = changes
                    .removed
                    .saturating_add(remove_agent(&mut self.population, agent_id));
            }
            for agent in results.added {
                if insert_agent(&mut self.population, agent) {
                    changes.created = changes.created.saturating_add(1);
                }
            }
            for message in results.messages {
                routed.route(message);
            }
            handlers_run = handlers_run.saturating_add(1);
        }

        let controls = decode_controls(routed.for_recipient(HOST_SENTINEL))?;
        let mut stop = None;
        for control in controls {
            match control {
                ControlMessage::CreateAgent(agent) => {
                    if insert_agent(&mut self.population, *agent) {
                        changes.created = changes.created.saturating_add(1);
                    }
                }
                ControlMessage::RemoveAgent(agent_id) => {
                    changes.removed = changes
                        .removed
                        .saturating_add(remove_agent(&mut self.population, &agent_id));
                }
                ControlMessage::Stop(signal) => {
                    if stop.is_none() {
                        stop = Some(signal);
                    }
                }
            }
        }

        let cache_stop = self.cache.advance_step(&self.population)?;
        let step = self.cache.current_step();
        let stop = stop.or(cache_stop);

        if let Some(signal) = stop {
            for agent in &mut self.population {
                agent.messages.clear();
            }
            info!(step, from = ?signal.from, "Stop requested, skipping behaviors");
            return Ok(StepSummary {
                step,
                agents: self.population.len(),
                created: changes.created,
                removed: changes.removed,
                handlers_run,
                behaviors_run: 0,
                stop: Some(signal),
            });
        }

        let inputs: Vec<(Vec<Message>, Vec<AgentId>)> = self
            .population
            .iter()
            .map(|agent| {
                (
                    routed.for_agent(agent),
                    neighbor_ids(&self.population, agent, self.topology.search_radius),
                )
            })
            .collect();
        let slots: Vec<Rc<RefCell<AgentState>>> = std::mem::take(&mut self.population)
            .into_iter()
            .map(|agent| Rc::new(RefCell::new(agent)))
            .collect();
        let outcome = self.run_behaviors(&slots, inputs);
        self.population = slots.into_iter().map(reclaim).collect();
        let behaviors_run = outcome?;

        info!(
            step,
            agents = self.population.len(),
            created = changes.created,
            removed = changes.removed,
            handlers_run,
            behaviors_run,
            "Step completed"
        );
        Ok(StepSummary {
            step,
            agents: self.population.len(),
            created: changes.created,
            removed: changes.removed,
            handlers_run,
            behaviors_run,
            stop: None,
        })
    }

    /// Run steps until `max_steps` have run or a `stop` message arrives.
    pub async fn run(&mut self, max_steps: u64) -> Result<RunSummary, StepError> {
        let started_at = Utc::now();
        info!(
            max_steps,
            agents = self.population.len(),
            behaviors = self.behaviors.len(),
            handlers = self.handlers.len(),
            "Simulation starting"
        );

        let mut final_summary: Option<StepSummary> = None;
        let mut total_steps: u64 = 0;
        let end_reason = loop {
            if total_steps >= max_steps {
                break RunEndReason::MaxStepsReached;
            }
            let summary = self.step().await?;
            total_steps = total_steps.saturating_add(1);
            let stop = summary.stop.clone();
            final_summary = Some(summary);
            if let Some(signal) = stop {
                break RunEndReason::Stopped { signal };
            }
        };

        let result = RunSummary {
            end_reason,
            final_summary,
            total_steps,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            reason = ?result.end_reason,
            total_steps = result.total_steps,
            final_agents = result.final_summary.as_ref().map(|s| s.agents),
            "Simulation ended"
        );
        Ok(result)
    }

    fn run_behaviors(
        &self,
        slots: &[Rc<RefCell<AgentState>>],
        inputs: Vec<(Vec<Message>, Vec<AgentId>)>,
    ) -> Result<usize, BehaviorError> {
        let runner = BehaviorRunner::new(&self.cache, &self.globals, &self.datasets);
        let mut ran: usize = 0;
        for (slot, (messages, neighbors)) in slots.iter().zip(inputs) {
            let names = {
                let mut agent = slot.borrow_mut();
                agent.messages.clear();
                agent.behaviors.clone()
            };
            for behavior in self.behaviors.resolve(&names)? {
                let state = HostHandle::new(MemoryAgentHandle::new(
                    Rc::clone(slot),
                    self.stats.clone(),
                ));
                let context = HostHandle::new(MemoryContextHandle::new(
                    messages.clone(),
                    neighbors.clone(),
                    self.stats.clone(),
                ));
                runner.apply(behavior, state, context)?;
                ran = ran.saturating_add(1);
            }
        }
        Ok(ran)
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("step", &self.cache.current_step())
            .field("agents", &self.population.len())
            .field("behaviors", &self.behaviors.len())
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

fn decode_controls(messages: &[Message]) -> Result<Vec<ControlMessage>, StepError> {
    let mut controls = Vec::new();
    for message in messages {
        let from = message
            .from
            .clone()
            .unwrap_or_else(|| AgentId::from(HOST_SENTINEL));
        match ControlMessage::decode(message, &from) {
            Ok(Some(control)) => controls.push(control),
            Ok(None) => {}
            Err(source) => return Err(StepError::MalformedControl { from, source }),
        }
    }
    Ok(controls)
}

/// Append `agent` unless its id is taken. Returns whether it was added.
fn insert_agent(population: &mut Vec<AgentState>, agent: AgentState) -> bool {
    if population.iter().any(|a| a.agent_id == agent.agent_id) {
        warn!(agent_id = %agent.agent_id, "Ignoring duplicate agent id");
        return false;
    }
    population.push(agent);
    true
}

/// Remove every agent with `agent_id`. Returns how many were removed.
fn remove_agent(population: &mut Vec<AgentState>, agent_id: &AgentId) -> usize {
    let before = population.len();
    population.retain(|a| &a.agent_id != agent_id);
    before.saturating_sub(population.len())
}

fn reclaim(slot: Rc<RefCell<AgentState>>) -> AgentState {
    Rc::try_unwrap(slot).map_or_else(|shared| shared.borrow().clone(), RefCell::into_inner)
}
