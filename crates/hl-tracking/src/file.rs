//! File-backed run recorder.
//!
//! Layout: `<root>/runs/<run_id>.json`, one file per run, rewritten after
//! every write. Writes go through a temporary file and a rename so a crash
//! never leaves a half-written record behind.

use std::fs;
use std::path::{Path, PathBuf};

use hl_types::{ArtifactRef, Configuration, RunError, RunId, RunRecord, RunResult, RunStatus};
use tracing::{info, warn};

use crate::memory::InMemoryRecorder;
use crate::recorder::{RunRecorder, TAG_STATUS_REASON};

/// Write-through recorder persisting each run as a JSON document.
#[derive(Debug)]
pub struct FileRecorder {
    runs_dir: PathBuf,
    cache: InMemoryRecorder,
}

impl FileRecorder {
    /// Open (or create) a tracking store rooted at `root`, loading any runs
    /// already recorded there.
    pub fn open<P: AsRef<Path>>(root: P) -> RunResult<Self> {
        let runs_dir = root.as_ref().join("runs");
        fs::create_dir_all(&runs_dir).map_err(|e| unavailable(&runs_dir, e))?;

        let mut existing = Vec::new();
        for entry in fs::read_dir(&runs_dir).map_err(|e| unavailable(&runs_dir, e))? {
            let path = entry.map_err(|e| unavailable(&runs_dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = fs::read_to_string(&path).map_err(|e| unavailable(&path, e))?;
            match serde_json::from_str::<RunRecord>(&text) {
                Ok(record) => existing.push(record),
                Err(e) => warn!("Skipping unreadable run file {}: {}", path.display(), e),
            }
        }
        existing.sort_by(|a, b| {
            a.started_at()
                .cmp(&b.started_at())
                .then_with(|| a.id().cmp(&b.id()))
        });

        let cache = InMemoryRecorder::new();
        let loaded = existing.len();
        for record in existing {
            cache.insert_record(record);
        }
        info!("Opened tracking store at {} ({} runs)", runs_dir.display(), loaded);

        Ok(Self { runs_dir, cache })
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    fn run_path(&self, run_id: RunId) -> PathBuf {
        self.runs_dir.join(format!("{run_id}.json"))
    }

    fn persist(&self, run_id: RunId) -> RunResult<()> {
        let record = self.cache.get_run(run_id)?;
        let json = serde_json::to_vec_pretty(&record).map_err(|e| RunError::Unavailable {
            message: format!("failed to serialize run {run_id}: {e}"),
        })?;

        let path = self.run_path(run_id);
        let tmp = self.runs_dir.join(format!(".{run_id}.json.tmp"));
        fs::write(&tmp, json).map_err(|e| unavailable(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| unavailable(&path, e))?;
        Ok(())
    }
}

fn unavailable(path: &Path, error: std::io::Error) -> RunError {
    RunError::Unavailable {
        message: format!("{}: {}", path.display(), error),
    }
}

impl RunRecorder for FileRecorder {
    fn begin_run(&self, parent_id: Option<RunId>, name: &str) -> RunResult<RunId> {
        let run_id = self.cache.begin_run(parent_id, name)?;
        if let Err(e) = self.persist(run_id) {
            // The caller never gets the id, so seal the cached copy here or
            // the parent can never be sealed.
            let _ = self.cache.set_tag(run_id, TAG_STATUS_REASON, "store unavailable");
            let _ = self.cache.end_run(run_id, RunStatus::Failed);
            return Err(e);
        }
        Ok(run_id)
    }

    fn log_params(&self, run_id: RunId, params: &Configuration) -> RunResult<()> {
        self.cache.log_params(run_id, params)?;
        self.persist(run_id)
    }

    fn log_metric(&self, run_id: RunId, name: &str, value: f64, step: u64) -> RunResult<()> {
        self.cache.log_metric(run_id, name, value, step)?;
        self.persist(run_id)
    }

    fn log_artifact(&self, run_id: RunId, name: &str, artifact: ArtifactRef) -> RunResult<()> {
        self.cache.log_artifact(run_id, name, artifact)?;
        self.persist(run_id)
    }

    fn set_tag(&self, run_id: RunId, key: &str, value: &str) -> RunResult<()> {
        self.cache.set_tag(run_id, key, value)?;
        self.persist(run_id)
    }

    fn end_run(&self, run_id: RunId, status: RunStatus) -> RunResult<()> {
        self.cache.end_run(run_id, status)?;
        self.persist(run_id)
    }

    fn get_run(&self, run_id: RunId) -> RunResult<RunRecord> {
        self.cache.get_run(run_id)
    }

    fn children(&self, parent_id: RunId) -> RunResult<Vec<RunRecord>> {
        self.cache.children(parent_id)
    }

    fn runs(&self) -> RunResult<Vec<RunRecord>> {
        self.cache.runs()
    }
}
