//! Bundled demo: a foraging population with a census handler.
//!
//! Agents lose energy every step and regain some by foraging; crowded
//! agents forage less. Well-fed agents split off a child through a
//! `create_agent` message, starving agents remove themselves, and every
//! agent reports its energy to the `census` handler, which brings in an
//! immigrant when the population runs low and stops the run once the
//! colony is large enough.

use hostbridge_core::behavior::{BehaviorRegistry, NamedBehavior};
use hostbridge_core::config::BridgeConfig;
use hostbridge_core::context::Context;
use hostbridge_core::handler::{HandlerState, MessageHandler};
use hostbridge_core::init::InitSource;
use hostbridge_core::memory::{POSITION, position};
use hostbridge_core::proxy::StateProxy;
use hostbridge_types::{AgentId, AgentState, Globals, Message, Recipient};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};
use tracing::debug;

/// Agent field holding the agent's energy.
pub const ENERGY: &str = "energy";

/// Name of the census message handler.
pub const CENSUS: &str = "census";

/// Behaviors every demo agent runs, in order.
const BEHAVIORS: [&str; 2] = ["forage", "socialize"];

/// Names handed out to the initial population.
const NAME_POOL: &[&str] = &[
    "Alder", "Birch", "Cedar", "Dusk", "Ember", "Fern", "Grove", "Haze", "Iris", "Juniper",
    "Kestrel", "Lark", "Moss", "Nettle", "Oak", "Pine",
];

const WORLD_SIZE: f64 = 10.0;
const STARTING_ENERGY: f64 = 8.0;

/// Global properties for a demo run.
pub fn globals(config: &BridgeConfig) -> Globals {
    let mut globals = Globals::new();
    globals.insert("seed".to_owned(), json!(config.simulation.seed));
    globals.insert("agent_count".to_owned(), json!(config.demo.agent_count));
    globals.insert("forage_gain".to_owned(), json!(1.5));
    globals.insert("birth_energy".to_owned(), json!(12.0));
    globals.insert("census_floor".to_owned(), json!(3));
    globals.insert("colony_cap".to_owned(), json!(200));
    globals
}

/// Seeded initializer: `agent_count` agents at random positions.
pub fn initializer() -> InitSource {
    InitSource::script(|ctx| {
        let seed = ctx.globals().get("seed").and_then(Value::as_u64).unwrap_or(0);
        let count = ctx
            .globals()
            .get("agent_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let mut rng = StdRng::seed_from_u64(seed);
        let agents = (0..count)
            .map(|i| {
                let name = NAME_POOL
                    .get(usize::try_from(i).unwrap_or(usize::MAX))
                    .map_or_else(|| format!("Agent{i}"), |n| (*n).to_owned());
                let x = rng.random_range(0.0..WORLD_SIZE);
                let y = rng.random_range(0.0..WORLD_SIZE);
                let mut agent = AgentState::new(format!("agent-{i}"))
                    .with_field(POSITION, json!([x, y]))
                    .with_field(ENERGY, STARTING_ENERGY)
                    .with_behaviors(BEHAVIORS);
                agent.agent_name = Some(name);
                agent
            })
            .collect();
        Ok(agents)
    })
}

/// The demo behaviors.
pub fn behaviors() -> BehaviorRegistry {
    [
        NamedBehavior::new("forage", vec![], forage),
        NamedBehavior::new("socialize", vec!["forage".to_owned()], socialize),
    ]
    .into_iter()
    .collect()
}

fn global_f64(ctx: &dyn Context, key: &str, default: f64) -> f64 {
    ctx.globals().get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn forage(state: &mut StateProxy<'_>, ctx: &dyn Context) -> anyhow::Result<()> {
    let crowd = u32::try_from(ctx.neighbors()?.len()).unwrap_or(u32::MAX);
    let gain = global_f64(ctx, "forage_gain", 1.5) / (f64::from(crowd) + 1.0);
    let energy = state.get_f64(ENERGY)?.unwrap_or(0.0) - 1.0 + gain;

    if energy <= 0.0 {
        debug!(agent_id = %state.agent_id(), "Agent starved");
        state.add_message(Recipient::host(), "remove_agent", None)?;
        return Ok(());
    }

    if energy >= global_f64(ctx, "birth_energy", 12.0) {
        let half = energy / 2.0;
        let parent_name = state
            .get("agent_name")?
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| state.agent_id().to_string());
        let mut child = json!({
            "agent_name": format!("{parent_name}-jr"),
            "behaviors": BEHAVIORS,
            ENERGY: half,
        });
        if let (Some(pos), Some(obj)) = (state.get(POSITION)?, child.as_object_mut()) {
            obj.insert(POSITION.to_owned(), pos);
        }
        state.add_message(Recipient::host(), "create_agent", Some(child))?;
        state.set(ENERGY, half)?;
        return Ok(());
    }

    state.set(ENERGY, energy)?;
    Ok(())
}

fn socialize(state: &mut StateProxy<'_>, ctx: &dyn Context) -> anyhow::Result<()> {
    let greetings = ctx.messages()?.iter().filter(|m| m.kind == "greet").count();
    state.set("greetings", greetings)?;

    let neighbors: Vec<String> = ctx
        .neighbors()?
        .iter()
        .map(|n| n.agent_id.to_string())
        .collect();
    if !neighbors.is_empty() {
        state.add_message(Recipient::Many(neighbors), "greet", None)?;
    }

    let energy = state.get(ENERGY)?;
    state.add_message(CENSUS, "report", Some(json!({ ENERGY: energy })))?;
    Ok(())
}

/// The census handler.
///
/// Counts reports; below `census_floor` it admits one immigrant at the
/// centre of the world, and at `colony_cap` or more it asks the host to stop.
pub fn census_handler() -> MessageHandler {
    MessageHandler::new(CENSUS, |mut state: HandlerState, globals| async move {
        tokio::task::yield_now().await;
        let reports = state.get_messages();
        let reporting = u64::try_from(reports.len()).unwrap_or(u64::MAX);
        let total_energy: f64 = reports
            .iter()
            .filter_map(|m| m.data.as_ref()?.get(ENERGY)?.as_f64())
            .sum();
        debug!(reporting, total_energy, "Census taken");

        let floor = globals.get("census_floor").and_then(Value::as_u64).unwrap_or(0);
        if reporting < floor {
            let centre = json!([WORLD_SIZE / 2.0, WORLD_SIZE / 2.0]);
            state.add_agent(
                AgentState::new(AgentId::generate())
                    .with_field(POSITION, centre)
                    .with_field(ENERGY, STARTING_ENERGY)
                    .with_behaviors(BEHAVIORS),
            );
        }

        let cap = globals.get("colony_cap").and_then(Value::as_u64).unwrap_or(u64::MAX);
        if reporting >= cap {
            state.add_message(Message::stop(Some(json!({
                "reason": "colony cap reached",
                "agents": reporting,
            }))));
        }
        Ok(state)
    })
}

/// Mean position of a population, for the end-of-run log.
pub fn centroid(population: &[AgentState]) -> Option<[f64; 2]> {
    let points: Vec<[f64; 3]> = population.iter().filter_map(position).collect();
    if points.is_empty() {
        return None;
    }
    let n = f64::from(u32::try_from(points.len()).ok()?);
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), [x, y, _]| (sx + x, sy + y));
    Some([sx / n, sy / n])
}
