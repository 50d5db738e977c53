//! Engine binary for the host/script bridge.
//!
//! Wires the bundled demo population, behaviors, and census handler into a
//! [`Simulation`] and runs it until the step limit or a `stop` message.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `hostbridge-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Build globals and run the seeded initializer
//! 4. Register behaviors and the census handler
//! 5. Run the simulation loop
//! 6. Log the result
//!
//! [`Simulation`]: hostbridge_core::sim::Simulation

mod demo;
mod error;

use std::path::Path;
use std::sync::Arc;

use hostbridge_core::config::BridgeConfig;
use hostbridge_core::sim::Simulation;
use hostbridge_types::InitContext;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Default configuration file, relative to the working directory.
const CONFIG_PATH: &str = "hostbridge-config.yaml";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration, initialization, or a step fails.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = Path::new(CONFIG_PATH);
    let config_found = config_path.exists();
    let config = load_config(config_path)?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!("hostbridge-engine starting");
    if !config_found {
        info!("Config file not found, using defaults");
    }
    info!(
        name = config.simulation.name,
        max_steps = config.simulation.max_steps,
        seed = config.simulation.seed,
        search_radius = ?config.topology.search_radius,
        agent_count = config.demo.agent_count,
        "Configuration loaded"
    );

    // 3. Seed the population.
    let context = InitContext::new(Arc::new(demo::globals(&config)), Arc::default());
    let sim = Simulation::initialize(&demo::initializer(), context, demo::behaviors())
        .map_err(EngineError::from)?;

    // 4. Attach topology and handlers.
    let mut sim = sim
        .with_topology(config.topology.clone())
        .with_handler(demo::census_handler());
    info!(
        agents = sim.population().len(),
        "Simulation assembled, entering step loop"
    );

    // 5. Run.
    let result = sim
        .run(config.simulation.max_steps)
        .await
        .map_err(EngineError::from)?;

    // 6. Log results.
    info!(
        end_reason = ?result.end_reason,
        total_steps = result.total_steps,
        final_agents = sim.population().len(),
        centroid = ?demo::centroid(sim.population()),
        handle_releases = sim.stats().releases(),
        host_writes = sim.stats().writes(),
        elapsed_ms = result
            .finished_at
            .signed_duration_since(result.started_at)
            .num_milliseconds(),
        "hostbridge-engine shutdown complete"
    );

    Ok(())
}

/// Load configuration, falling back to defaults when the file is absent.
fn load_config(path: &Path) -> Result<BridgeConfig, EngineError> {
    if path.exists() {
        Ok(BridgeConfig::from_file(path)?)
    } else {
        Ok(BridgeConfig::parse("")?)
    }
}
