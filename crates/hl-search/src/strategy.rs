//! Proposal engine trait and strategy selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use hl_types::{Configuration, TrialResult};

use crate::grid::GridSearch;
use crate::random::RandomSearch;
use crate::space::SearchSpace;
use crate::tpe::TpeSearch;

/// Proposes the next configuration to evaluate given everything seen so far.
///
/// Implementations own their RNG; two engines built with the same seed and
/// fed the same history in the same order propose the same configurations.
pub trait ProposalEngine: Send {
    fn propose(&mut self, space: &SearchSpace, history: &[TrialResult]) -> Configuration;

    /// Strategy name, recorded as a tag on the search run.
    fn name(&self) -> &str;
}

fn default_steps() -> usize {
    5
}

fn default_gamma() -> f64 {
    0.25
}

fn default_candidates() -> usize {
    24
}

fn default_startup() -> usize {
    1
}

fn default_exploration() -> f64 {
    0.3
}

/// Serializable strategy choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Random,
    Grid {
        /// Points per continuous dimension.
        #[serde(default = "default_steps")]
        steps: usize,
    },
    Tpe {
        #[serde(default = "default_gamma")]
        gamma: f64,
        #[serde(default = "default_candidates")]
        n_candidates: usize,
        /// Random draws before the surrogate takes over.
        #[serde(default = "default_startup")]
        n_startup_trials: usize,
        /// Probability of a pure random draw while the history is too thin
        /// to fit a surrogate.
        #[serde(default = "default_exploration")]
        exploration_weight: f64,
    },
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::tpe()
    }
}

impl StrategyConfig {
    pub fn grid() -> Self {
        Self::Grid {
            steps: default_steps(),
        }
    }

    pub fn tpe() -> Self {
        Self::Tpe {
            gamma: default_gamma(),
            n_candidates: default_candidates(),
            n_startup_trials: default_startup(),
            exploration_weight: default_exploration(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Grid { .. } => "grid",
            Self::Tpe { .. } => "tpe",
        }
    }

    /// Build a boxed engine seeded with `seed`.
    pub fn build(&self, seed: u64) -> Box<dyn ProposalEngine> {
        match self {
            Self::Random => Box::new(RandomSearch::new(seed)),
            Self::Grid { steps } => Box::new(GridSearch::new(*steps, seed)),
            Self::Tpe {
                gamma,
                n_candidates,
                n_startup_trials,
                exploration_weight,
            } => Box::new(
                TpeSearch::new(seed)
                    .with_gamma(*gamma)
                    .with_candidates(*n_candidates)
                    .with_startup_trials(*n_startup_trials)
                    .with_exploration_weight(*exploration_weight),
            ),
        }
    }
}

impl fmt::Display for StrategyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "grid" => Ok(Self::grid()),
            "tpe" | "bayesian" => Ok(Self::tpe()),
            other => Err(format!(
                "unknown strategy '{other}' (expected random, grid or tpe)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names() {
        assert_eq!("random".parse::<StrategyConfig>().unwrap(), StrategyConfig::Random);
        assert_eq!("GRID".parse::<StrategyConfig>().unwrap().name(), "grid");
        assert_eq!("tpe".parse::<StrategyConfig>().unwrap(), StrategyConfig::tpe());
        assert!("annealing".parse::<StrategyConfig>().is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: StrategyConfig = serde_json::from_str(r#"{"kind":"tpe","gamma":0.1}"#).unwrap();
        match config {
            StrategyConfig::Tpe {
                gamma,
                n_candidates,
                ..
            } => {
                assert_eq!(gamma, 0.1);
                assert_eq!(n_candidates, 24);
            }
            other => panic!("unexpected strategy: {other:?}"),
        }
    }

    #[test]
    fn built_engines_report_their_name() {
        for config in [StrategyConfig::Random, StrategyConfig::grid(), StrategyConfig::tpe()] {
            assert_eq!(config.build(1).name(), config.name());
        }
    }
}
