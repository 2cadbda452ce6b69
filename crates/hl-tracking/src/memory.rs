//! In-memory run recorder.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use hl_types::{ArtifactRef, Configuration, RunError, RunId, RunRecord, RunResult, RunStatus};
use tracing::debug;

use crate::recorder::RunRecorder;

#[derive(Debug)]
struct StoredRun {
    sequence: u64,
    record: RunRecord,
}

/// Run recorder backed by a concurrent map.
///
/// Writes to different runs proceed in parallel; `begin_run` and `end_run`
/// are serialised so the parent/child lifetime checks see a consistent tree.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    runs: DashMap<RunId, StoredRun>,
    sequence: AtomicU64,
    structure: Mutex<()>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Insert an already-existing record (e.g. loaded from disk).
    pub(crate) fn insert_record(&self, record: RunRecord) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.runs.insert(record.id(), StoredRun { sequence, record });
    }

    fn with_run<T>(
        &self,
        run_id: RunId,
        f: impl FnOnce(&mut RunRecord) -> RunResult<T>,
    ) -> RunResult<T> {
        let mut entry = self.runs.get_mut(&run_id).ok_or(RunError::unknown(run_id))?;
        f(&mut entry.record)
    }

    fn sorted(&self, filter: impl Fn(&RunRecord) -> bool) -> Vec<RunRecord> {
        let mut found: Vec<(u64, RunRecord)> = self
            .runs
            .iter()
            .filter(|entry| filter(&entry.record))
            .map(|entry| (entry.sequence, entry.record.clone()))
            .collect();
        found.sort_by_key(|(sequence, _)| *sequence);
        found.into_iter().map(|(_, record)| record).collect()
    }
}

impl RunRecorder for InMemoryRecorder {
    fn begin_run(&self, parent_id: Option<RunId>, name: &str) -> RunResult<RunId> {
        let _guard = self.structure.lock();

        if let Some(parent) = parent_id {
            let entry = self.runs.get(&parent).ok_or(RunError::unknown(parent))?;
            if entry.record.is_sealed() {
                return Err(RunError::InvalidRun {
                    run_id: parent,
                    reason: "cannot begin a child under a sealed run".to_string(),
                });
            }
        }

        let record = RunRecord::open(parent_id, name);
        let run_id = record.id();
        self.insert_record(record);
        debug!("Began run {} ({}) under {:?}", run_id, name, parent_id);
        Ok(run_id)
    }

    fn log_params(&self, run_id: RunId, params: &Configuration) -> RunResult<()> {
        self.with_run(run_id, |run| run.record_params(params))
    }

    fn log_metric(&self, run_id: RunId, name: &str, value: f64, step: u64) -> RunResult<()> {
        self.with_run(run_id, |run| run.record_metric(name, value, step))
    }

    fn log_artifact(&self, run_id: RunId, name: &str, artifact: ArtifactRef) -> RunResult<()> {
        self.with_run(run_id, |run| run.record_artifact(name, artifact))
    }

    fn set_tag(&self, run_id: RunId, key: &str, value: &str) -> RunResult<()> {
        self.with_run(run_id, |run| run.record_tag(key, value))
    }

    fn end_run(&self, run_id: RunId, status: RunStatus) -> RunResult<()> {
        let _guard = self.structure.lock();

        if !self.runs.contains_key(&run_id) {
            return Err(RunError::unknown(run_id));
        }
        let open_children = self
            .runs
            .iter()
            .filter(|e| e.record.parent_id() == Some(run_id) && !e.record.is_sealed())
            .count();
        if open_children > 0 {
            return Err(RunError::InvalidRun {
                run_id,
                reason: format!("{open_children} child run(s) are still open"),
            });
        }

        self.with_run(run_id, |run| run.seal(status))?;
        debug!("Sealed run {} as {}", run_id, status);
        Ok(())
    }

    fn get_run(&self, run_id: RunId) -> RunResult<RunRecord> {
        self.runs
            .get(&run_id)
            .map(|entry| entry.record.clone())
            .ok_or(RunError::unknown(run_id))
    }

    fn children(&self, parent_id: RunId) -> RunResult<Vec<RunRecord>> {
        if !self.runs.contains_key(&parent_id) {
            return Err(RunError::unknown(parent_id));
        }
        Ok(self.sorted(|run| run.parent_id() == Some(parent_id)))
    }

    fn runs(&self) -> RunResult<Vec<RunRecord>> {
        Ok(self.sorted(|_| true))
    }
}
