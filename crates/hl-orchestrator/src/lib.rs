//! # hl-orchestrator
//!
//! Hyperparameter search orchestration for Hyperloom.
//!
//! Drives a [`ProposalEngine`](hl_search::ProposalEngine) and a
//! [`Trainer`](hl_types::Trainer) for a fixed trial budget, records every
//! trial as a child run of one search run, ranks the results and promotes
//! the winner to a model registry.

pub mod cancel;
pub mod config;
pub mod orchestrator;
pub mod promotion;

pub use cancel::CancellationToken;
pub use config::SearchConfig;
pub use orchestrator::{Orchestrator, SearchPhase, SearchReport, MODEL_ARTIFACT};
pub use promotion::promote_best;
