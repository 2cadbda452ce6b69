//! # hl-search
//!
//! Search space definitions and proposal strategies for Hyperloom.
//!
//! Provides the validated search space, the [`ProposalEngine`] trait the
//! orchestrator drives, and three interchangeable strategies: random, grid and
//! a Tree-structured Parzen Estimator.

mod grid;
mod kde;
mod random;
mod space;
mod strategy;
mod tpe;

pub use grid::GridSearch;
pub use random::RandomSearch;
pub use space::{ParameterKind, ParameterSpec, SearchSpace, SearchSpaceBuilder};
pub use strategy::{ProposalEngine, StrategyConfig};
pub use tpe::TpeSearch;
