//! Configuration loading and typed config structures for a bridge run.
//!
//! The canonical configuration lives in `hostbridge-config.yaml` at the
//! project root. Every section and field has a default, so an empty file is
//! a valid configuration.

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

/// Environment variable overriding `simulation.max_steps`.
pub const MAX_STEPS_ENV: &str = "HOSTBRIDGE_MAX_STEPS";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BridgeConfig {
    /// Run-level settings (name, step limit, seed).
    #[serde(default)]
    pub simulation: SimulationSection,

    /// Neighbor search settings.
    #[serde(default)]
    pub topology: TopologyConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Settings for the bundled demo population.
    #[serde(default)]
    pub demo: DemoConfig,
}

impl BridgeConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `HOSTBRIDGE_MAX_STEPS` overrides `simulation.max_steps`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply env overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config = Self::parse_without_env(yaml)?;
        config
            .simulation
            .apply_env_overrides(std::env::var(MAX_STEPS_ENV).ok().as_deref());
        Ok(config)
    }

    /// Parse configuration from a YAML string, ignoring the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse_without_env(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }
}

/// Run-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimulationSection {
    /// Human-readable run name.
    #[serde(default = "default_name")]
    pub name: String,

    /// Steps to run unless a `stop` message ends the run first.
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,

    /// Random seed for reproducible initial populations.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl SimulationSection {
    /// Apply the raw value of `HOSTBRIDGE_MAX_STEPS`, if set.
    ///
    /// Values that are not a non-negative integer are ignored with a warning.
    pub fn apply_env_overrides(&mut self, max_steps: Option<&str>) {
        let Some(raw) = max_steps else {
            return;
        };
        match raw.trim().parse::<u64>() {
            Ok(steps) => self.max_steps = steps,
            Err(e) => warn!(value = raw, error = %e, "Ignoring invalid {MAX_STEPS_ENV}"),
        }
    }
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            max_steps: default_max_steps(),
            seed: default_seed(),
        }
    }
}

/// Neighbor search configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TopologyConfig {
    /// Default neighbor search radius. Agents may override it with their
    /// own `search_radius` field. Without either, agents have no neighbors.
    #[serde(default)]
    pub search_radius: Option<f64>,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG`
    /// is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Demo population configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DemoConfig {
    /// Number of agents the demo initializer creates.
    #[serde(default = "default_agent_count")]
    pub agent_count: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            agent_count: default_agent_count(),
        }
    }
}

fn default_name() -> String {
    "hostbridge".to_owned()
}

const fn default_max_steps() -> u64 {
    100
}

const fn default_seed() -> u64 {
    42
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_agent_count() -> u32 {
    10
}
