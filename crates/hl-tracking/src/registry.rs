//! Versioned model registry: the promotion gateway.
//!
//! A registered model is an immutable copy of a trial's artifact plus the
//! metadata that produced it. Versions start at 1 and only ever increase.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hl_types::{ArtifactRef, Configuration, RegistryError, RunId};
use tracing::info;

use crate::artifact::ArtifactStore;

/// Everything known about the configuration being promoted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_name: String,
    pub run_id: RunId,
    pub search_run_id: RunId,
    pub objective: String,
    #[serde(with = "hl_types::float")]
    pub score: f64,
    pub configuration: Configuration,
}

/// Handle to a servable, versioned model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServableHandle {
    pub name: String,
    pub version: u32,
    pub uri: String,
    pub media_type: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub handle: ServableHandle,
    pub metadata: ModelMetadata,
}

pub trait ModelRegistry: Send + Sync {
    /// Register `artifact` as the next version of `metadata.model_name`.
    fn register(
        &self,
        artifact: &ArtifactRef,
        metadata: &ModelMetadata,
    ) -> Result<ServableHandle, RegistryError>;

    /// Highest registered version of a model.
    fn latest(&self, name: &str) -> Result<RegisteredModel, RegistryError>;
}

fn storage(message: impl std::fmt::Display) -> RegistryError {
    RegistryError::Storage {
        message: message.to_string(),
    }
}

fn check_model_name(name: &str) -> Result<(), RegistryError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && name != "."
        && name != "..";
    if !valid {
        return Err(storage(format!("invalid model name: {name:?}")));
    }
    Ok(())
}

/// Filesystem registry laid out as `<root>/<name>/v<N>/{model.*,metadata.json}`.
pub struct LocalModelRegistry {
    root: PathBuf,
    artifacts: Arc<dyn ArtifactStore>,
    lock: Mutex<()>,
}

impl LocalModelRegistry {
    pub fn new<P: AsRef<Path>>(
        root: P,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Result<Self, RegistryError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(storage)?;
        Ok(Self {
            root,
            artifacts,
            lock: Mutex::new(()),
        })
    }

    fn versions(&self, name: &str) -> Result<Vec<u32>, RegistryError> {
        let dir = self.root.join(name);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir).map_err(storage)? {
            let file_name = entry.map_err(storage)?.file_name();
            if let Some(v) = file_name
                .to_str()
                .and_then(|s| s.strip_prefix('v'))
                .and_then(|s| s.parse::<u32>().ok())
            {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}

fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "application/json" => "json",
        _ => "bin",
    }
}

impl ModelRegistry for LocalModelRegistry {
    fn register(
        &self,
        artifact: &ArtifactRef,
        metadata: &ModelMetadata,
    ) -> Result<ServableHandle, RegistryError> {
        check_model_name(&metadata.model_name)?;
        let bytes = self.artifacts.get(artifact).map_err(storage)?;

        let _guard = self.lock.lock();
        let version = self
            .versions(&metadata.model_name)?
            .last()
            .map_or(1, |v| v + 1);
        let dir = self
            .root
            .join(&metadata.model_name)
            .join(format!("v{version}"));
        fs::create_dir_all(&dir).map_err(storage)?;

        let model_path = dir.join(format!("model.{}", extension_for(&artifact.media_type)));
        fs::write(&model_path, &bytes).map_err(storage)?;

        let handle = ServableHandle {
            name: metadata.model_name.clone(),
            version,
            uri: format!("file://{}", model_path.display()),
            media_type: artifact.media_type.clone(),
            registered_at: Utc::now(),
        };
        let record = RegisteredModel {
            handle: handle.clone(),
            metadata: metadata.clone(),
        };
        let json = serde_json::to_vec_pretty(&record).map_err(storage)?;
        fs::write(dir.join("metadata.json"), json).map_err(storage)?;

        info!(
            "Registered model {} version {} from run {}",
            handle.name, handle.version, metadata.run_id
        );
        Ok(handle)
    }

    fn latest(&self, name: &str) -> Result<RegisteredModel, RegistryError> {
        check_model_name(name)?;
        let version = self
            .versions(name)?
            .last()
            .copied()
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })?;
        let path = self
            .root
            .join(name)
            .join(format!("v{version}"))
            .join("metadata.json");
        let text = fs::read_to_string(path).map_err(storage)?;
        serde_json::from_str(&text).map_err(storage)
    }
}

/// Registry kept in memory; handles use `models:/<name>/<version>` URIs.
#[derive(Debug, Default)]
pub struct InMemoryModelRegistry {
    models: Mutex<HashMap<String, Vec<RegisteredModel>>>,
}

impl InMemoryModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn versions(&self, name: &str) -> Vec<RegisteredModel> {
        self.models.lock().get(name).cloned().unwrap_or_default()
    }
}

impl ModelRegistry for InMemoryModelRegistry {
    fn register(
        &self,
        artifact: &ArtifactRef,
        metadata: &ModelMetadata,
    ) -> Result<ServableHandle, RegistryError> {
        check_model_name(&metadata.model_name)?;
        let mut models = self.models.lock();
        let versions = models.entry(metadata.model_name.clone()).or_default();
        let version = versions.len() as u32 + 1;
        let handle = ServableHandle {
            name: metadata.model_name.clone(),
            version,
            uri: format!("models:/{}/{}", metadata.model_name, version),
            media_type: artifact.media_type.clone(),
            registered_at: Utc::now(),
        };
        versions.push(RegisteredModel {
            handle: handle.clone(),
            metadata: metadata.clone(),
        });
        Ok(handle)
    }

    fn latest(&self, name: &str) -> Result<RegisteredModel, RegistryError> {
        self.models
            .lock()
            .get(name)
            .and_then(|v| v.last().cloned())
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })
    }
}
