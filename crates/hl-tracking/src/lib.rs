//! Experiment tracking for Hyperloom.
//!
//! Provides:
//! - The [`RunRecorder`] contract and the [`RunScope`] guard that guarantees
//!   every begun run is sealed
//! - In-memory and file-backed recorders
//! - Artifact stores that turn trained model bytes into [`hl_types::ArtifactRef`]s
//! - A versioned model registry used for promotion

pub mod artifact;
pub mod file;
pub mod memory;
pub mod recorder;
pub mod registry;

pub use artifact::{ArtifactError, ArtifactStore, InMemoryArtifactStore, LocalArtifactStore};
pub use file::FileRecorder;
pub use memory::InMemoryRecorder;
pub use recorder::{RunRecorder, RunScope, TAG_ERROR, TAG_STATUS_REASON};
pub use registry::{
    InMemoryModelRegistry, LocalModelRegistry, ModelMetadata, ModelRegistry, RegisteredModel,
    ServableHandle,
};
