//! Initial population.
//!
//! Runs once per simulation, before the first step. The initializer only
//! sees globals and datasets; no agents or host handles exist yet.

use std::collections::BTreeSet;
use std::sync::Arc;

use hostbridge_types::{AgentId, AgentState, InitContext};

/// Signature of a scripted initializer.
pub type InitFn = dyn Fn(&InitContext) -> anyhow::Result<Vec<AgentState>> + Send + Sync;

/// Errors that can occur while building the initial population.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// The initializer returned an error.
    #[error("initializer failed: {source}")]
    Failed {
        /// The initializer's error.
        source: anyhow::Error,
    },

    /// A JSON initial state could not be parsed.
    #[error("invalid initial state JSON: {source}")]
    Parse {
        /// The parse error.
        #[from]
        source: serde_json::Error,
    },

    /// Two initial agents share an id.
    #[error("duplicate agent id {agent_id} in initial state")]
    DuplicateAgent {
        /// The repeated id.
        agent_id: AgentId,
    },
}

/// Where the initial population comes from.
#[derive(Clone)]
pub enum InitSource {
    /// A fixed list of agents.
    Static(Vec<AgentState>),
    /// A JSON array of agent states.
    Json(String),
    /// A scripted initializer.
    Script(Arc<InitFn>),
}

impl InitSource {
    /// Wrap a scripted initializer.
    pub fn script<F>(f: F) -> Self
    where
        F: Fn(&InitContext) -> anyhow::Result<Vec<AgentState>> + Send + Sync + 'static,
    {
        Self::Script(Arc::new(f))
    }

    /// Produce the validated initial population.
    pub fn load(&self, context: &InitContext) -> Result<Vec<AgentState>, InitError> {
        match self {
            Self::Static(agents) => validate(agents.clone()),
            Self::Json(text) => validate(serde_json::from_str(text)?),
            Self::Script(init) => Initializer::apply(init.as_ref(), context),
        }
    }
}

impl std::fmt::Debug for InitSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(agents) => f.debug_tuple("Static").field(&agents.len()).finish(),
            Self::Json(text) => f.debug_tuple("Json").field(&text.len()).finish(),
            Self::Script(_) => f.write_str("Script"),
        }
    }
}

/// Invokes an initializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Initializer;

impl Initializer {
    /// Run `init` and validate the agents it returns.
    pub fn apply(init: &InitFn, context: &InitContext) -> Result<Vec<AgentState>, InitError> {
        let agents = init(context).map_err(|source| InitError::Failed { source })?;
        validate(agents)
    }
}

fn validate(agents: Vec<AgentState>) -> Result<Vec<AgentState>, InitError> {
    let mut seen = BTreeSet::new();
    for agent in &agents {
        if !seen.insert(&agent.agent_id) {
            return Err(InitError::DuplicateAgent {
                agent_id: agent.agent_id.clone(),
            });
        }
    }
    Ok(agents)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use hostbridge_types::Globals;
    use serde_json::json;

    use super::*;

    fn context_with_count(count: u64) -> InitContext {
        let mut globals = Globals::new();
        globals.insert("count".to_owned(), json!(count));
        InitContext::new(Arc::new(globals), Arc::default())
    }

    #[test]
    fn script_reads_globals() {
        let source = InitSource::script(|ctx| {
            let count = ctx.globals().get("count").and_then(|c| c.as_u64()).unwrap_or(0);
            Ok((0..count).map(|i| AgentState::new(format!("a{i}"))).collect())
        });
        let agents = source.load(&context_with_count(3)).unwrap();
        assert_eq!(agents.len(), 3);
    }

    #[test]
    fn script_failure_is_wrapped() {
        let source = InitSource::script(|_| anyhow::bail!("no seed"));
        assert!(matches!(
            source.load(&InitContext::default()),
            Err(InitError::Failed { .. })
        ));
    }

    #[test]
    fn json_source_parses_agent_list() {
        let source = InitSource::Json(
            json!([{"agent_id": "a", "behaviors": ["move"]}, {"agent_id": "b"}]).to_string(),
        );
        let agents = source.load(&InitContext::default()).unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents.first().map(|a| a.behaviors.len()), Some(1));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let source = InitSource::Static(vec![AgentState::new("a"), AgentState::new("a")]);
        assert!(matches!(
            source.load(&InitContext::default()),
            Err(InitError::DuplicateAgent { .. })
        ));
    }
}
