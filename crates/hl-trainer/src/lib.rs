//! # hl-trainer
//!
//! Reference [`Trainer`](hl_types::Trainer) implementation and the dataset
//! collaborator used by the `hyperloom` binary: CSV loading plus a seeded
//! train/validation/holdout split.

pub mod data;
pub mod mlp;

pub use data::{load_csv, split_dataset, CsvOptions, SplitRatios};
pub use mlp::{MlpModel, MlpParams, MlpTrainer, Standardizer};
