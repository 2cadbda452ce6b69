//! Artifact stores.
//!
//! Trainers hand back model bytes; the orchestrator immediately stores them
//! here and keeps only the returned [`ArtifactRef`].

use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};

use hl_types::{ArtifactRef, ModelArtifact, RunId};

const FILE_SCHEME: &str = "file://";
const MEMORY_SCHEME: &str = "memory://";

/// Errors surfaced by artifact storage.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact not found: {uri}")]
    NotFound { uri: String },
    #[error("unsupported artifact uri for this store: {uri}")]
    UnsupportedUri { uri: String },
    #[error("invalid artifact name: {name}")]
    InvalidName { name: String },
}

pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// Durable home for trained model bytes.
pub trait ArtifactStore: Send + Sync {
    /// Store `artifact` under `run_id`/`name` and return its reference.
    fn put(&self, run_id: RunId, name: &str, artifact: &ModelArtifact) -> ArtifactResult<ArtifactRef>;

    /// Fetch the bytes behind a reference produced by this store.
    fn get(&self, artifact: &ArtifactRef) -> ArtifactResult<Vec<u8>>;
}

fn check_name(name: &str) -> ArtifactResult<()> {
    let bad = name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name == "."
        || name == "..";
    if bad {
        return Err(ArtifactError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Stores artifacts on the local filesystem at `<root>/<run_id>/<name>`.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> ArtifactResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a `file://` reference to a path inside this store.
    pub fn path_of(&self, artifact: &ArtifactRef) -> ArtifactResult<PathBuf> {
        let path = artifact
            .uri
            .strip_prefix(FILE_SCHEME)
            .map(PathBuf::from)
            .ok_or_else(|| ArtifactError::UnsupportedUri {
                uri: artifact.uri.clone(),
            })?;
        if !path.starts_with(&self.root) {
            return Err(ArtifactError::UnsupportedUri {
                uri: artifact.uri.clone(),
            });
        }
        Ok(path)
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn put(&self, run_id: RunId, name: &str, artifact: &ModelArtifact) -> ArtifactResult<ArtifactRef> {
        check_name(name)?;
        let dir = self.root.join(run_id.to_string());
        fs::create_dir_all(&dir)?;
        let path = dir.join(name);
        fs::write(&path, &artifact.bytes)?;

        Ok(ArtifactRef {
            uri: format!("{FILE_SCHEME}{}", path.display()),
            media_type: artifact.media_type.clone(),
            size_bytes: artifact.bytes.len() as u64,
        })
    }

    fn get(&self, artifact: &ArtifactRef) -> ArtifactResult<Vec<u8>> {
        let path = self.path_of(artifact)?;
        if !path.exists() {
            return Err(ArtifactError::NotFound {
                uri: artifact.uri.clone(),
            });
        }
        Ok(fs::read(path)?)
    }
}

/// Keeps artifacts in memory. For tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn put(&self, run_id: RunId, name: &str, artifact: &ModelArtifact) -> ArtifactResult<ArtifactRef> {
        check_name(name)?;
        let uri = format!("{MEMORY_SCHEME}{run_id}/{name}");
        self.blobs.insert(uri.clone(), artifact.bytes.clone());
        Ok(ArtifactRef {
            uri,
            media_type: artifact.media_type.clone(),
            size_bytes: artifact.bytes.len() as u64,
        })
    }

    fn get(&self, artifact: &ArtifactRef) -> ArtifactResult<Vec<u8>> {
        if !artifact.uri.starts_with(MEMORY_SCHEME) {
            return Err(ArtifactError::UnsupportedUri {
                uri: artifact.uri.clone(),
            });
        }
        self.blobs
            .get(&artifact.uri)
            .map(|b| b.value().clone())
            .ok_or_else(|| ArtifactError::NotFound {
                uri: artifact.uri.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn artifact() -> ModelArtifact {
        ModelArtifact::json(br#"{"weights":[1.0,2.0]}"#.to_vec())
    }

    #[test]
    fn local_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path()).unwrap();
        let run_id = RunId::new_v4();

        let reference = store.put(run_id, "model.json", &artifact()).unwrap();
        assert!(reference.uri.starts_with("file://"));
        assert_eq!(reference.size_bytes, artifact().bytes.len() as u64);
        assert_eq!(store.get(&reference).unwrap(), artifact().bytes);
        assert!(dir.path().join(run_id.to_string()).join("model.json").exists());
    }

    #[test]
    fn local_store_rejects_foreign_uris() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path()).unwrap();
        let foreign = ArtifactRef {
            uri: "file:///etc/passwd".into(),
            media_type: "text/plain".into(),
            size_bytes: 0,
        };
        assert!(matches!(
            store.get(&foreign),
            Err(ArtifactError::UnsupportedUri { .. })
        ));
    }

    #[test]
    fn names_cannot_escape_run_directory() {
        let store = InMemoryArtifactStore::new();
        assert!(store.put(RunId::new_v4(), "../model", &artifact()).is_err());
        assert!(store.put(RunId::new_v4(), "", &artifact()).is_err());
    }

    #[test]
    fn memory_store_round_trip() {
        let store = InMemoryArtifactStore::new();
        let reference = store.put(RunId::new_v4(), "model.json", &artifact()).unwrap();
        assert_eq!(store.get(&reference).unwrap(), artifact().bytes);
        assert_eq!(store.len(), 1);

        let missing = ArtifactRef {
            uri: "memory://nothing/here".into(),
            ..reference
        };
        assert!(matches!(store.get(&missing), Err(ArtifactError::NotFound { .. })));
    }
}
