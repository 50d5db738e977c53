//! Shared, read-only simulation inputs: global properties and datasets.

use std::sync::Arc;

use serde_json::{Map, Value};

/// Global simulation properties, shared by every behavior in a step.
pub type Globals = Map<String, Value>;

/// Auxiliary datasets keyed by dataset name.
pub type Datasets = Map<String, Value>;

/// Inputs handed to the initializer before any agent exists.
///
/// Both maps are behind [`Arc`] so the same snapshot can later be shared with
/// the step driver without copying.
#[derive(Debug, Clone, Default)]
pub struct InitContext {
    globals: Arc<Globals>,
    datasets: Arc<Datasets>,
}

impl InitContext {
    /// Build a context from shared globals and datasets.
    pub const fn new(globals: Arc<Globals>, datasets: Arc<Datasets>) -> Self {
        Self { globals, datasets }
    }

    /// Global properties.
    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    /// Datasets by name.
    pub fn data(&self) -> &Datasets {
        &self.datasets
    }

    /// Split back into the shared maps.
    pub fn into_parts(self) -> (Arc<Globals>, Arc<Datasets>) {
        (self.globals, self.datasets)
    }
}
