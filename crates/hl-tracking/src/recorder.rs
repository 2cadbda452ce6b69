//! Run recorder contract and scoped run acquisition.

use hl_types::{ArtifactRef, Configuration, RunId, RunRecord, RunResult, RunStatus};
use tracing::warn;

/// Tag explaining why a run ended the way it did (e.g. "cancelled").
pub const TAG_STATUS_REASON: &str = "status_reason";
/// Tag holding a trainer error message on failed trial runs.
pub const TAG_ERROR: &str = "error";

/// Records a tree of runs.
///
/// There is no ambient "active run": callers pass the id returned by
/// [`RunRecorder::begin_run`] to every subsequent call. Writes to a sealed or
/// unknown run fail with `RunError::InvalidRun`; sealing twice fails with
/// `RunError::AlreadySealed`.
pub trait RunRecorder: Send + Sync {
    /// Open a new run, optionally under an open parent run.
    fn begin_run(&self, parent_id: Option<RunId>, name: &str) -> RunResult<RunId>;

    fn log_params(&self, run_id: RunId, params: &Configuration) -> RunResult<()>;

    fn log_metric(&self, run_id: RunId, name: &str, value: f64, step: u64) -> RunResult<()>;

    fn log_artifact(&self, run_id: RunId, name: &str, artifact: ArtifactRef) -> RunResult<()>;

    fn set_tag(&self, run_id: RunId, key: &str, value: &str) -> RunResult<()>;

    /// Seal a run. Fails while the run still has open children.
    fn end_run(&self, run_id: RunId, status: RunStatus) -> RunResult<()>;

    fn get_run(&self, run_id: RunId) -> RunResult<RunRecord>;

    /// Direct children of a run, in creation order.
    fn children(&self, parent_id: RunId) -> RunResult<Vec<RunRecord>>;

    /// Every run in the store, in creation order.
    fn runs(&self) -> RunResult<Vec<RunRecord>>;
}

/// Guard owning an open run.
///
/// Call [`RunScope::finish`] to seal with an explicit status. If the guard is
/// dropped unfinished (an early `?` return, a panic unwinding through the
/// caller) the run is sealed as `Failed` so nothing is ever left open.
pub struct RunScope<'a> {
    recorder: &'a dyn RunRecorder,
    run_id: RunId,
    finished: bool,
}

impl<'a> RunScope<'a> {
    pub fn begin(
        recorder: &'a dyn RunRecorder,
        parent_id: Option<RunId>,
        name: &str,
    ) -> RunResult<Self> {
        let run_id = recorder.begin_run(parent_id, name)?;
        Ok(Self {
            recorder,
            run_id,
            finished: false,
        })
    }

    pub fn id(&self) -> RunId {
        self.run_id
    }

    pub fn log_params(&self, params: &Configuration) -> RunResult<()> {
        self.recorder.log_params(self.run_id, params)
    }

    pub fn log_metric(&self, name: &str, value: f64, step: u64) -> RunResult<()> {
        self.recorder.log_metric(self.run_id, name, value, step)
    }

    pub fn log_artifact(&self, name: &str, artifact: ArtifactRef) -> RunResult<()> {
        self.recorder.log_artifact(self.run_id, name, artifact)
    }

    pub fn set_tag(&self, key: &str, value: &str) -> RunResult<()> {
        self.recorder.set_tag(self.run_id, key, value)
    }

    /// Seal the run with `status`.
    pub fn finish(mut self, status: RunStatus) -> RunResult<()> {
        self.finished = true;
        self.recorder.end_run(self.run_id, status)
    }

    /// Tag the run with `reason` and seal it with `status`. The seal is
    /// attempted even if tagging fails; the first error is returned.
    pub fn finish_with_reason(self, status: RunStatus, reason: &str) -> RunResult<()> {
        let tagged = self.set_tag(TAG_STATUS_REASON, reason);
        let sealed = self.finish(status);
        tagged.and(sealed)
    }
}

impl Drop for RunScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let reason = if std::thread::panicking() {
            "panicked"
        } else {
            "scope exited before the run was finished"
        };
        let _ = self.recorder.set_tag(self.run_id, TAG_STATUS_REASON, reason);
        if let Err(e) = self.recorder.end_run(self.run_id, RunStatus::Failed) {
            warn!("Failed to seal abandoned run {}: {}", self.run_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRecorder;
    use hl_types::RunError;

    #[test]
    fn finished_scope_keeps_its_status() {
        let recorder = InMemoryRecorder::new();
        let scope = RunScope::begin(&recorder, None, "search").unwrap();
        let id = scope.id();
        scope.finish(RunStatus::Completed).unwrap();

        assert_eq!(recorder.get_run(id).unwrap().status(), RunStatus::Completed);
    }

    #[test]
    fn dropped_scope_is_sealed_failed() {
        let recorder = InMemoryRecorder::new();
        let id = {
            let scope = RunScope::begin(&recorder, None, "search").unwrap();
            scope.log_metric("loss", 1.0, 0).unwrap();
            scope.id()
        };

        let run = recorder.get_run(id).unwrap();
        assert_eq!(run.status(), RunStatus::Failed);
        assert!(run.tag(TAG_STATUS_REASON).is_some());
    }

    #[test]
    fn early_return_seals_run() {
        fn body(recorder: &InMemoryRecorder) -> Result<RunId, RunError> {
            let scope = RunScope::begin(recorder, None, "trial")?;
            let id = scope.id();
            recorder.end_run(RunId::nil(), RunStatus::Completed)?;
            scope.finish(RunStatus::Completed)?;
            Ok(id)
        }

        let recorder = InMemoryRecorder::new();
        assert!(body(&recorder).is_err());
        let runs = recorder.runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status(), RunStatus::Failed);
    }

    #[test]
    fn panic_inside_scope_seals_run() {
        let recorder = InMemoryRecorder::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = RunScope::begin(&recorder, None, "trial").unwrap();
            panic!("trainer blew up");
        }));
        assert!(result.is_err());

        let runs = recorder.runs().unwrap();
        assert_eq!(runs[0].status(), RunStatus::Failed);
        assert_eq!(runs[0].tag(TAG_STATUS_REASON), Some("panicked"));
    }

    #[test]
    fn finish_with_reason_tags_and_seals() {
        let recorder = InMemoryRecorder::new();
        let scope = RunScope::begin(&recorder, None, "trial").unwrap();
        let id = scope.id();
        scope
            .finish_with_reason(RunStatus::Failed, "cancelled")
            .unwrap();

        let run = recorder.get_run(id).unwrap();
        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.tag(TAG_STATUS_REASON), Some("cancelled"));
    }
}
