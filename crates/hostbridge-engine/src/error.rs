//! Error types for the engine binary.

/// Top-level error for the engine binary.
///
/// Wraps every failure `main` can hit so it can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: hostbridge_core::config::ConfigError,
    },

    /// Initialization or a step failed.
    #[error("simulation error: {source}")]
    Simulation {
        /// The underlying step error.
        #[from]
        source: hostbridge_core::sim::StepError,
    },
}
