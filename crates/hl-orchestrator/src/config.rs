//! Search configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use hl_search::{SearchSpace, StrategyConfig};
use hl_types::{config_error, Configuration, HlResult};

/// Top-level configuration for a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Name of the top-level search run.
    pub name: String,

    /// The parameter search space.
    pub search_space: SearchSpace,

    pub strategy: StrategyConfig,

    /// Number of trials to run.
    pub budget: usize,

    /// Seed for the proposal engine.
    pub seed: u64,

    /// How many trials to run in parallel. 1 runs them on the calling thread.
    pub concurrency: usize,

    /// Configurations evaluated before the proposal engine is consulted, in
    /// order. Each must lie inside the search space.
    pub initial_configurations: Vec<Configuration>,

    /// Registry name the winning model is promoted under.
    pub model_name: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            name: "hyperparameter-search".to_string(),
            search_space: SearchSpace::learning_rate_momentum(),
            strategy: StrategyConfig::default(),
            budget: 20,
            seed: 42,
            concurrency: 1,
            initial_configurations: Vec::new(),
            model_name: "hyperloom-model".to_string(),
        }
    }
}

impl SearchConfig {
    pub fn new(search_space: SearchSpace) -> Self {
        Self {
            search_space,
            ..Self::default()
        }
    }

    /// Read a JSON config file; omitted fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> HlResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| config_error!("failed to read {}: {}", path.display(), e))?;
        serde_json::from_str(&text)
            .map_err(|e| config_error!("invalid config {}: {}", path.display(), e))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_budget(mut self, n: usize) -> Self {
        self.budget = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn with_initial_configuration(mut self, configuration: Configuration) -> Self {
        self.initial_configurations.push(configuration);
        self
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }
}
