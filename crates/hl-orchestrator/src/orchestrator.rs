//! The search loop.
//!
//! One top-level run per search, one child run per trial. The orchestrator is
//! the only writer of [`SearchState`]; with `concurrency > 1` it stays the
//! single proposer and hands configurations to scoped worker threads, which
//! report finished trials back over a channel.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use hl_search::ProposalEngine;
use hl_tracking::{ArtifactStore, RunRecorder, RunScope, TAG_ERROR};
use hl_types::{
    describe_configuration, Configuration, Dataset, OrchestrationError, RunId, RunStatus,
    SearchState, Trainer, TrainerError, TrialResult, TrialStatus,
};

use crate::cancel::CancellationToken;
use crate::config::SearchConfig;

/// Artifact name used for every trial's model.
pub const MODEL_ARTIFACT: &str = "model";

/// Lifecycle of an orchestrator. A search runs at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    Idle,
    Running,
    Completed,
    Aborted,
}

impl fmt::Display for SearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Outcome of a completed search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchReport {
    pub search_run_id: RunId,
    /// Name of the score the trainer reports.
    pub objective: String,
    /// Lowest score, earliest on ties. When every trial failed this is the
    /// first trial and [`SearchReport::has_usable_model`] is false.
    pub best: TrialResult,
    pub state: SearchState,
    pub succeeded: usize,
    pub failed: usize,
    pub budget: usize,
}

impl SearchReport {
    pub fn has_usable_model(&self) -> bool {
        self.best.is_usable()
    }

    pub fn summary(&self) -> String {
        let best = if self.has_usable_model() {
            format!(
                "best {} = {:.6} at trial {} ({})",
                self.objective,
                self.best.score,
                self.best.trial_number,
                describe_configuration(&self.best.configuration)
            )
        } else {
            "no usable model".to_string()
        };
        format!(
            "{} of {} trials succeeded, {} failed; {}",
            self.succeeded, self.budget, self.failed, best
        )
    }
}

/// Runs one trial inside its own child run. Shared by reference with worker
/// threads.
struct TrialRunner<'a> {
    recorder: &'a dyn RunRecorder,
    artifacts: &'a dyn ArtifactStore,
    trainer: &'a dyn Trainer,
    cancel: &'a CancellationToken,
    parent_id: RunId,
    training: &'a Dataset,
    validation: &'a Dataset,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl TrialRunner<'_> {
    /// `Ok(None)` when the search was cancelled while the trial ran: the child
    /// run is sealed `Failed` with `status_reason=cancelled` and the trial is
    /// not recorded.
    fn run(
        &self,
        trial_number: usize,
        configuration: Configuration,
    ) -> Result<Option<TrialResult>, OrchestrationError> {
        let started = Instant::now();
        let scope = RunScope::begin(
            self.recorder,
            Some(self.parent_id),
            &format!("trial-{trial_number}"),
        )?;
        scope.log_params(&configuration)?;

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.trainer
                .train_and_evaluate(&configuration, self.training, self.validation)
        }))
        .unwrap_or_else(|payload| {
            Err(TrainerError::Panicked {
                message: panic_message(&*payload),
            })
        });

        if self.cancel.is_cancelled() {
            scope.finish_with_reason(RunStatus::Failed, "cancelled")?;
            return Ok(None);
        }

        let objective = self.trainer.objective_name();
        let run_id = scope.id();
        let result = match outcome {
            Ok(outcome) => {
                let score = if outcome.score.is_finite() {
                    outcome.score
                } else {
                    f64::INFINITY
                };
                let artifact = self
                    .artifacts
                    .put(run_id, MODEL_ARTIFACT, &outcome.artifact)
                    .map_err(|e| OrchestrationError::ArtifactStore {
                        message: e.to_string(),
                    })?;
                scope.log_artifact(MODEL_ARTIFACT, artifact.clone())?;
                for point in &outcome.curve {
                    scope.log_metric(&point.name, point.value, point.step)?;
                }
                scope.log_metric(objective, score, 0)?;
                scope.finish(RunStatus::Completed)?;

                TrialResult {
                    trial_number,
                    configuration,
                    score,
                    artifact: Some(artifact),
                    run_id,
                    status: TrialStatus::Completed,
                    error: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
            Err(e) => {
                warn!("Trial {} failed: {}", trial_number, e);
                let message = e.to_string();
                scope.set_tag(TAG_ERROR, &message)?;
                scope.log_metric(objective, f64::INFINITY, 0)?;
                scope.finish(RunStatus::Failed)?;

                TrialResult {
                    trial_number,
                    configuration,
                    score: f64::INFINITY,
                    artifact: None,
                    run_id,
                    status: TrialStatus::Failed,
                    error: Some(message),
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
        };

        info!(
            "Trial {} finished: {} = {} in {} ms ({})",
            trial_number,
            objective,
            result.score,
            result.duration_ms,
            describe_configuration(&result.configuration)
        );
        Ok(Some(result))
    }
}

type WorkerReport = Result<Option<TrialResult>, OrchestrationError>;

/// Drives a search: propose, train, record, repeat, then rank.
pub struct Orchestrator {
    config: SearchConfig,
    recorder: Arc<dyn RunRecorder>,
    artifacts: Arc<dyn ArtifactStore>,
    trainer: Arc<dyn Trainer>,
    engine: Box<dyn ProposalEngine>,
    cancel: CancellationToken,
    phase: SearchPhase,
}

impl Orchestrator {
    pub fn new(
        config: SearchConfig,
        recorder: Arc<dyn RunRecorder>,
        artifacts: Arc<dyn ArtifactStore>,
        trainer: Arc<dyn Trainer>,
    ) -> Self {
        let engine = config.strategy.build(config.seed);
        Self {
            config,
            recorder,
            artifacts,
            trainer,
            engine,
            cancel: CancellationToken::new(),
            phase: SearchPhase::Idle,
        }
    }

    /// Replace the engine built from the configured strategy.
    pub fn with_engine(mut self, engine: Box<dyn ProposalEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> SearchPhase {
        self.phase
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run the configured budget.
    pub fn run(
        &mut self,
        training: &Dataset,
        validation: &Dataset,
    ) -> Result<SearchReport, OrchestrationError> {
        self.run_search(self.config.budget, training, validation)
    }

    /// Run exactly `budget` trials under a new top-level run.
    ///
    /// Trainer failures are recorded and the search continues. Recorder,
    /// artifact store and proposal failures abort it: the open trial run and
    /// the search run are sealed `Failed` and the error is returned.
    pub fn run_search(
        &mut self,
        budget: usize,
        training: &Dataset,
        validation: &Dataset,
    ) -> Result<SearchReport, OrchestrationError> {
        if budget == 0 {
            return Err(OrchestrationError::InvalidBudget);
        }
        if self.phase != SearchPhase::Idle {
            return Err(OrchestrationError::InvalidState {
                state: self.phase.to_string(),
            });
        }
        for configuration in &self.config.initial_configurations {
            self.config.search_space.validate(configuration)?;
        }

        self.phase = SearchPhase::Running;
        let recorder = Arc::clone(&self.recorder);
        let parent = match RunScope::begin(recorder.as_ref(), None, &self.config.name) {
            Ok(scope) => scope,
            Err(e) => {
                self.phase = SearchPhase::Aborted;
                return Err(e.into());
            }
        };
        info!(
            "Starting search {} ({} trials, strategy {}, concurrency {})",
            parent.id(),
            budget,
            self.engine.name(),
            self.config.concurrency.max(1)
        );

        let result = self
            .tag_search(&parent, budget)
            .and_then(|_| self.search_loop(parent.id(), budget, training, validation))
            .and_then(|state| self.complete(&parent, state, budget));

        match result {
            Ok(report) => match parent.finish(RunStatus::Completed) {
                Ok(()) => {
                    self.phase = SearchPhase::Completed;
                    info!("Search {} completed: {}", report.search_run_id, report.summary());
                    Ok(report)
                }
                Err(e) => {
                    self.phase = SearchPhase::Aborted;
                    Err(e.into())
                }
            },
            Err(error) => {
                self.phase = SearchPhase::Aborted;
                let (status, reason) = match error {
                    OrchestrationError::Cancelled { .. } => {
                        (RunStatus::Aborted, "cancelled".to_string())
                    }
                    _ => (RunStatus::Failed, error.to_string()),
                };
                warn!("Search {} aborted: {}", parent.id(), error);
                if let Err(e) = parent.finish_with_reason(status, &reason) {
                    warn!("Failed to seal search run: {}", e);
                }
                Err(error)
            }
        }
    }

    fn tag_search(&self, parent: &RunScope<'_>, budget: usize) -> Result<(), OrchestrationError> {
        parent.set_tag("strategy", self.engine.name())?;
        parent.set_tag("budget", &budget.to_string())?;
        parent.set_tag("seed", &self.config.seed.to_string())?;
        parent.set_tag("concurrency", &self.config.concurrency.max(1).to_string())?;
        parent.set_tag("objective", self.trainer.objective_name())?;
        Ok(())
    }

    /// Next configuration to try: queued initial configurations first, then
    /// the proposal engine. Always validated against the space.
    fn next_configuration(
        &mut self,
        trial_number: usize,
        state: &SearchState,
    ) -> Result<Configuration, OrchestrationError> {
        let configuration = match self.config.initial_configurations.get(trial_number) {
            Some(queued) => queued.clone(),
            None => self
                .engine
                .propose(&self.config.search_space, state.trials()),
        };
        self.config.search_space.validate(&configuration)?;
        debug!(
            "Proposed trial {}: {}",
            trial_number,
            describe_configuration(&configuration)
        );
        Ok(configuration)
    }

    fn search_loop(
        &mut self,
        parent_id: RunId,
        budget: usize,
        training: &Dataset,
        validation: &Dataset,
    ) -> Result<SearchState, OrchestrationError> {
        let recorder = Arc::clone(&self.recorder);
        let artifacts = Arc::clone(&self.artifacts);
        let trainer = Arc::clone(&self.trainer);
        let cancel = self.cancel.clone();
        let runner = TrialRunner {
            recorder: recorder.as_ref(),
            artifacts: artifacts.as_ref(),
            trainer: trainer.as_ref(),
            cancel: &cancel,
            parent_id,
            training,
            validation,
        };

        let concurrency = self.config.concurrency.clamp(1, budget);
        if concurrency == 1 {
            self.run_sequential(&runner, budget)
        } else {
            self.run_parallel(&runner, budget, concurrency)
        }
    }

    fn run_sequential(
        &mut self,
        runner: &TrialRunner<'_>,
        budget: usize,
    ) -> Result<SearchState, OrchestrationError> {
        let mut state = SearchState::new();
        for trial_number in 0..budget {
            if runner.cancel.is_cancelled() {
                return Err(OrchestrationError::Cancelled {
                    trials_recorded: state.len(),
                });
            }
            let configuration = self.next_configuration(trial_number, &state)?;
            match runner.run(trial_number, configuration)? {
                Some(result) => state.push(result),
                None => {
                    return Err(OrchestrationError::Cancelled {
                        trials_recorded: state.len(),
                    })
                }
            }
        }
        Ok(state)
    }

    fn run_parallel(
        &mut self,
        runner: &TrialRunner<'_>,
        budget: usize,
        concurrency: usize,
    ) -> Result<SearchState, OrchestrationError> {
        let (job_tx, job_rx): (Sender<(usize, Configuration)>, Receiver<_>) = unbounded();
        let (result_tx, result_rx) = unbounded::<WorkerReport>();

        std::thread::scope(|s| {
            let mut workers = Vec::with_capacity(concurrency);
            for worker_id in 0..concurrency {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                workers.push(s.spawn(move || {
                    for (trial_number, configuration) in job_rx.iter() {
                        debug!("Worker {} picked up trial {}", worker_id, trial_number);
                        let report = catch_unwind(AssertUnwindSafe(|| {
                            runner.run(trial_number, configuration)
                        }))
                        .unwrap_or_else(|payload| {
                            Err(OrchestrationError::WorkerPanicked {
                                message: panic_message(&*payload),
                            })
                        });
                        if result_tx.send(report).is_err() {
                            break;
                        }
                    }
                }));
            }
            drop(result_tx);

            let mut state = SearchState::new();
            let mut failure: Option<OrchestrationError> = None;
            let mut cancelled = false;
            let mut dispatched = 0;
            let mut in_flight = 0;

            loop {
                while failure.is_none()
                    && !cancelled
                    && dispatched < budget
                    && in_flight < concurrency
                {
                    if runner.cancel.is_cancelled() {
                        cancelled = true;
                        break;
                    }
                    match self.next_configuration(dispatched, &state) {
                        Ok(configuration) => {
                            if job_tx.send((dispatched, configuration)).is_err() {
                                failure = Some(OrchestrationError::WorkerPanicked {
                                    message: "all trial workers exited".to_string(),
                                });
                                break;
                            }
                            dispatched += 1;
                            in_flight += 1;
                        }
                        Err(e) => failure = Some(e),
                    }
                }
                if in_flight == 0 {
                    break;
                }

                match result_rx.recv() {
                    Ok(Ok(Some(result))) => {
                        in_flight -= 1;
                        state.push(result);
                    }
                    Ok(Ok(None)) => {
                        in_flight -= 1;
                        cancelled = true;
                    }
                    Ok(Err(e)) => {
                        in_flight -= 1;
                        failure.get_or_insert(e);
                    }
                    Err(_) => {
                        failure.get_or_insert(OrchestrationError::WorkerPanicked {
                            message: "all trial workers exited".to_string(),
                        });
                        break;
                    }
                }
            }
            drop(job_tx);

            for worker in workers {
                if let Err(payload) = worker.join() {
                    failure.get_or_insert(OrchestrationError::WorkerPanicked {
                        message: panic_message(&*payload),
                    });
                }
            }

            match failure {
                Some(e) => Err(e),
                None if cancelled || runner.cancel.is_cancelled() && state.len() < budget => {
                    Err(OrchestrationError::Cancelled {
                        trials_recorded: state.len(),
                    })
                }
                None => Ok(state),
            }
        })
    }

    /// Rank the finished trials and write the summary onto the search run.
    fn complete(
        &self,
        parent: &RunScope<'_>,
        state: SearchState,
        budget: usize,
    ) -> Result<SearchReport, OrchestrationError> {
        let best = state
            .best()
            .cloned()
            .ok_or_else(|| OrchestrationError::InvalidState {
                state: "completed without any recorded trial".to_string(),
            })?;

        let best_params: Configuration = best
            .configuration
            .iter()
            .map(|(name, value)| (format!("best.{name}"), value.clone()))
            .collect();
        parent.log_params(&best_params)?;
        parent.log_metric("best_score", best.score, 0)?;
        parent.log_metric("trials_succeeded", state.succeeded() as f64, 0)?;
        parent.log_metric("trials_failed", state.failed() as f64, 0)?;
        parent.set_tag("best_run_id", &best.run_id.to_string())?;

        Ok(SearchReport {
            search_run_id: parent.id(),
            objective: self.trainer.objective_name().to_string(),
            succeeded: state.succeeded(),
            failed: state.failed(),
            budget,
            best,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hl_search::{RandomSearch, SearchSpace, StrategyConfig};
    use hl_tracking::{
        FileRecorder, InMemoryArtifactStore, InMemoryRecorder, TAG_STATUS_REASON,
    };
    use hl_types::{
        ArtifactRef, ModelArtifact, ParameterValue, RunError, RunRecord, RunResult,
        TrainingOutcome,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn data() -> Dataset {
        Dataset::new(vec!["x".into()], vec![vec![1.0], vec![2.0]], vec![1.0, 2.0]).unwrap()
    }

    fn get(config: &Configuration, name: &str) -> f64 {
        config.get(name).and_then(ParameterValue::as_f64).unwrap_or(f64::NAN)
    }

    /// Scores `|lr - 0.05| + |momentum - 0.5|`.
    struct Bowl;

    impl Trainer for Bowl {
        fn train_and_evaluate(
            &self,
            configuration: &Configuration,
            _training: &Dataset,
            _validation: &Dataset,
        ) -> Result<TrainingOutcome, TrainerError> {
            let score = (get(configuration, "lr") - 0.05).abs()
                + (get(configuration, "momentum") - 0.5).abs();
            Ok(TrainingOutcome {
                score,
                artifact: ModelArtifact::json(format!("{{\"score\":{score}}}").into_bytes()),
                curve: Vec::new(),
            })
        }

        fn objective_name(&self) -> &str {
            "loss"
        }
    }

    struct AlwaysFails;

    impl Trainer for AlwaysFails {
        fn train_and_evaluate(
            &self,
            _configuration: &Configuration,
            _training: &Dataset,
            _validation: &Dataset,
        ) -> Result<TrainingOutcome, TrainerError> {
            Err(TrainerError::Failed {
                message: "out of memory".to_string(),
            })
        }
    }

    struct Panics;

    impl Trainer for Panics {
        fn train_and_evaluate(
            &self,
            _configuration: &Configuration,
            _training: &Dataset,
            _validation: &Dataset,
        ) -> Result<TrainingOutcome, TrainerError> {
            panic!("numerical library exploded");
        }
    }

    /// Cancels the token while running its `after`-th call.
    struct CancelsAfter {
        calls: AtomicUsize,
        after: usize,
        token: CancellationToken,
    }

    impl Trainer for CancelsAfter {
        fn train_and_evaluate(
            &self,
            configuration: &Configuration,
            training: &Dataset,
            validation: &Dataset,
        ) -> Result<TrainingOutcome, TrainerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.after {
                self.token.cancel();
            }
            Bowl.train_and_evaluate(configuration, training, validation)
        }
    }

    fn orchestrator(
        config: SearchConfig,
        recorder: Arc<dyn RunRecorder>,
        trainer: Arc<dyn Trainer>,
    ) -> Orchestrator {
        Orchestrator::new(
            config,
            recorder,
            Arc::new(InMemoryArtifactStore::new()),
            trainer,
        )
    }

    fn children(recorder: &dyn RunRecorder, parent: RunId) -> Vec<RunRecord> {
        recorder.children(parent).unwrap()
    }

    fn search_run(recorder: &dyn RunRecorder) -> RunRecord {
        recorder
            .runs()
            .unwrap()
            .into_iter()
            .find(|r| r.parent_id().is_none())
            .unwrap()
    }

    #[test]
    fn end_to_end_search_with_injected_trial() {
        let mut injected = Configuration::new();
        injected.insert("lr".into(), ParameterValue::Float(1e-5));
        injected.insert("momentum".into(), ParameterValue::Float(0.0));

        let config = SearchConfig::new(SearchSpace::learning_rate_momentum())
            .with_budget(12)
            .with_initial_configuration(injected.clone());
        let recorder = Arc::new(InMemoryRecorder::new());
        let mut orch = orchestrator(config, recorder.clone(), Arc::new(Bowl));

        let report = orch.run(&data(), &data()).unwrap();
        assert_eq!(orch.phase(), SearchPhase::Completed);
        assert_eq!(report.state.len(), 12);
        assert_eq!(report.succeeded, 12);
        assert_eq!(report.state.trials()[0].configuration, injected);

        let injected_score = report.state.trials()[0].score;
        assert!(report.best.score <= injected_score);
        for trial in report.state.trials() {
            assert!(report.best.score <= trial.score);
        }
        SearchSpace::learning_rate_momentum()
            .validate(&report.best.configuration)
            .unwrap();
        assert!(report.has_usable_model());

        let parent = recorder.get_run(report.search_run_id).unwrap();
        assert_eq!(parent.status(), RunStatus::Completed);
        assert_eq!(parent.tag("strategy"), Some("tpe"));
        assert_eq!(parent.tag("budget"), Some("12"));
        assert_eq!(parent.tag("best_run_id"), Some(report.best.run_id.to_string().as_str()));
        assert_eq!(parent.latest_metric("best_score"), Some(report.best.score));
        assert_eq!(parent.latest_metric("trials_failed"), Some(0.0));
        assert_eq!(
            parent.params().get("best.lr"),
            report.best.configuration.get("lr")
        );

        let kids = children(&*recorder, report.search_run_id);
        assert_eq!(kids.len(), 12);
        assert_eq!(kids[0].name(), "trial-0");
        assert!(kids.iter().all(|k| k.status() == RunStatus::Completed));
        assert!(kids.iter().all(|k| k.artifacts().contains_key(MODEL_ARTIFACT)));
        assert_eq!(kids[0].latest_metric("loss"), Some(injected_score));
    }

    #[test]
    fn every_budget_yields_that_many_sealed_children() {
        for budget in [1, 2, 5, 9] {
            let recorder = Arc::new(InMemoryRecorder::new());
            let config = SearchConfig::default()
                .with_budget(budget)
                .with_strategy(StrategyConfig::Random);
            let report = orchestrator(config, recorder.clone(), Arc::new(Bowl))
                .run(&data(), &data())
                .unwrap();

            let kids = children(&*recorder, report.search_run_id);
            assert_eq!(kids.len(), budget);
            assert!(kids.iter().all(|k| k.is_sealed()));
            assert!(kids.iter().all(|k| k.parent_id() == Some(report.search_run_id)));
        }
    }

    #[test]
    fn always_failing_trainer_completes_without_usable_model() {
        let recorder = Arc::new(InMemoryRecorder::new());
        let config = SearchConfig::default().with_budget(4);
        let mut orch = orchestrator(config, recorder.clone(), Arc::new(AlwaysFails));

        let report = orch.run(&data(), &data()).unwrap();
        assert_eq!(orch.phase(), SearchPhase::Completed);
        assert_eq!(report.failed, 4);
        assert_eq!(report.succeeded, 0);
        assert!(report.state.trials().iter().all(|t| t.score == f64::INFINITY));
        assert!(!report.has_usable_model());
        assert_eq!(report.best.trial_number, 0);
        assert!(report.summary().contains("0 of 4 trials succeeded"));

        let kids = children(&*recorder, report.search_run_id);
        assert!(kids.iter().all(|k| k.status() == RunStatus::Failed));
        assert_eq!(kids[0].tag(TAG_ERROR), Some("training failed: out of memory"));
        assert_eq!(
            recorder.get_run(report.search_run_id).unwrap().status(),
            RunStatus::Completed
        );
    }

    #[test]
    fn trainer_panics_are_trial_failures() {
        let recorder = Arc::new(InMemoryRecorder::new());
        let config = SearchConfig::default().with_budget(2);
        let report = orchestrator(config, recorder.clone(), Arc::new(Panics))
            .run(&data(), &data())
            .unwrap();

        assert_eq!(report.failed, 2);
        let error = report.state.trials()[0].error.clone().unwrap();
        assert!(error.contains("numerical library exploded"));
    }

    #[test]
    fn cancellation_after_five_of_twelve() {
        let token = CancellationToken::new();
        let trainer = CancelsAfter {
            calls: AtomicUsize::new(0),
            after: 5,
            token: token.clone(),
        };
        let recorder = Arc::new(InMemoryRecorder::new());
        let config = SearchConfig::default().with_budget(12);
        let mut orch =
            orchestrator(config, recorder.clone(), Arc::new(trainer)).with_cancellation(token);

        let err = orch.run(&data(), &data()).unwrap_err();
        assert!(matches!(err, OrchestrationError::Cancelled { trials_recorded: 4 }));
        assert_eq!(orch.phase(), SearchPhase::Aborted);

        let parent = search_run(&*recorder);
        assert_eq!(parent.status(), RunStatus::Aborted);
        let kids = children(&*recorder, parent.id());
        assert_eq!(kids.len(), 5);
        assert!(kids.iter().all(|k| k.is_sealed()));
        assert_eq!(kids[4].status(), RunStatus::Failed);
        assert_eq!(kids[4].tag(TAG_STATUS_REASON), Some("cancelled"));
    }

    #[test]
    fn zero_budget_is_rejected_before_any_run() {
        let recorder = Arc::new(InMemoryRecorder::new());
        let mut orch = orchestrator(SearchConfig::default(), recorder.clone(), Arc::new(Bowl));
        assert!(matches!(
            orch.run_search(0, &data(), &data()),
            Err(OrchestrationError::InvalidBudget)
        ));
        assert!(recorder.is_empty());
        assert_eq!(orch.phase(), SearchPhase::Idle);
    }

    #[test]
    fn second_search_is_rejected() {
        let recorder = Arc::new(InMemoryRecorder::new());
        let mut orch = orchestrator(
            SearchConfig::default().with_budget(1),
            recorder,
            Arc::new(Bowl),
        );
        orch.run(&data(), &data()).unwrap();
        assert!(matches!(
            orch.run(&data(), &data()),
            Err(OrchestrationError::InvalidState { .. })
        ));
    }

    #[test]
    fn out_of_domain_initial_configuration_fails_fast() {
        let mut bad = Configuration::new();
        bad.insert("lr".into(), ParameterValue::Float(5.0));
        bad.insert("momentum".into(), ParameterValue::Float(0.5));
        let recorder = Arc::new(InMemoryRecorder::new());
        let config = SearchConfig::default().with_initial_configuration(bad);
        let mut orch = orchestrator(config, recorder.clone(), Arc::new(Bowl));

        assert!(matches!(
            orch.run(&data(), &data()),
            Err(OrchestrationError::InvalidProposal(_))
        ));
        assert!(recorder.is_empty());
    }

    #[test]
    fn unavailable_recorder_aborts_and_keeps_finished_children() {
        let dir = TempDir::new().unwrap();
        let recorder = Arc::new(FileRecorder::open(dir.path()).unwrap());

        /// Removes the tracking directory on its third call.
        struct Sabotage {
            calls: AtomicUsize,
            runs_dir: std::path::PathBuf,
        }

        impl Trainer for Sabotage {
            fn train_and_evaluate(
                &self,
                configuration: &Configuration,
                training: &Dataset,
                validation: &Dataset,
            ) -> Result<TrainingOutcome, TrainerError> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 2 {
                    let _ = std::fs::remove_dir_all(&self.runs_dir);
                }
                Bowl.train_and_evaluate(configuration, training, validation)
            }
        }

        let trainer = Sabotage {
            calls: AtomicUsize::new(0),
            runs_dir: recorder.runs_dir().to_path_buf(),
        };
        let config = SearchConfig::default().with_budget(6);
        let mut orch = orchestrator(config, recorder.clone(), Arc::new(trainer));

        let err = orch.run(&data(), &data()).unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::Recorder(RunError::Unavailable { .. })
        ));
        assert_eq!(orch.phase(), SearchPhase::Aborted);

        // the in-memory view still reflects every seal attempt
        let parent = search_run(&*recorder);
        assert_eq!(parent.status(), RunStatus::Failed);
        let kids = children(&*recorder, parent.id());
        assert_eq!(kids.len(), 3);
        assert!(kids[..2].iter().all(|k| k.status() == RunStatus::Completed));
        assert_eq!(kids[2].status(), RunStatus::Failed);
    }

    /// Random proposals that delete the tracking directory right before
    /// handing out proposal number `at`.
    struct BreaksStoreOnProposal {
        inner: RandomSearch,
        proposals: usize,
        at: usize,
        runs_dir: std::path::PathBuf,
    }

    impl ProposalEngine for BreaksStoreOnProposal {
        fn propose(&mut self, space: &SearchSpace, history: &[TrialResult]) -> Configuration {
            self.proposals += 1;
            if self.proposals == self.at {
                let _ = std::fs::remove_dir_all(&self.runs_dir);
            }
            self.inner.propose(space, history)
        }

        fn name(&self) -> &str {
            "random"
        }
    }

    #[test]
    fn store_failure_when_opening_a_trial_leaves_nothing_open() {
        let dir = TempDir::new().unwrap();
        let recorder = Arc::new(FileRecorder::open(dir.path()).unwrap());
        let engine = BreaksStoreOnProposal {
            inner: RandomSearch::new(7),
            proposals: 0,
            at: 3,
            runs_dir: recorder.runs_dir().to_path_buf(),
        };
        let config = SearchConfig::default().with_budget(5);
        let mut orch =
            orchestrator(config, recorder.clone(), Arc::new(Bowl)).with_engine(Box::new(engine));

        let err = orch.run(&data(), &data()).unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::Recorder(RunError::Unavailable { .. })
        ));
        assert_eq!(orch.phase(), SearchPhase::Aborted);

        let runs = recorder.runs().unwrap();
        assert!(runs.iter().all(|r| r.is_sealed()));
        let parent = search_run(&*recorder);
        assert_eq!(parent.status(), RunStatus::Failed);
        let kids = children(&*recorder, parent.id());
        assert_eq!(kids.len(), 3);
        assert!(kids[..2].iter().all(|k| k.status() == RunStatus::Completed));
        assert_eq!(kids[2].status(), RunStatus::Failed);
    }

    /// Cancels the token once `after` child runs have been sealed `Completed`.
    struct CancelAfterCompleted {
        inner: InMemoryRecorder,
        completed: AtomicUsize,
        after: usize,
        token: CancellationToken,
    }

    impl RunRecorder for CancelAfterCompleted {
        fn begin_run(&self, parent_id: Option<RunId>, name: &str) -> RunResult<RunId> {
            self.inner.begin_run(parent_id, name)
        }

        fn log_params(&self, run_id: RunId, params: &Configuration) -> RunResult<()> {
            self.inner.log_params(run_id, params)
        }

        fn log_metric(&self, run_id: RunId, name: &str, value: f64, step: u64) -> RunResult<()> {
            self.inner.log_metric(run_id, name, value, step)
        }

        fn log_artifact(&self, run_id: RunId, name: &str, artifact: ArtifactRef) -> RunResult<()> {
            self.inner.log_artifact(run_id, name, artifact)
        }

        fn set_tag(&self, run_id: RunId, key: &str, value: &str) -> RunResult<()> {
            self.inner.set_tag(run_id, key, value)
        }

        fn end_run(&self, run_id: RunId, status: RunStatus) -> RunResult<()> {
            let is_child = self.inner.get_run(run_id)?.parent_id().is_some();
            self.inner.end_run(run_id, status)?;
            if is_child
                && status == RunStatus::Completed
                && self.completed.fetch_add(1, Ordering::SeqCst) + 1 == self.after
            {
                self.token.cancel();
            }
            Ok(())
        }

        fn get_run(&self, run_id: RunId) -> RunResult<RunRecord> {
            self.inner.get_run(run_id)
        }

        fn children(&self, parent_id: RunId) -> RunResult<Vec<RunRecord>> {
            self.inner.children(parent_id)
        }

        fn runs(&self) -> RunResult<Vec<RunRecord>> {
            self.inner.runs()
        }
    }

    #[test]
    fn cancellation_between_trials_keeps_completed_ones() {
        let token = CancellationToken::new();
        let recorder = Arc::new(CancelAfterCompleted {
            inner: InMemoryRecorder::new(),
            completed: AtomicUsize::new(0),
            after: 5,
            token: token.clone(),
        });
        let config = SearchConfig::default().with_budget(12);
        let mut orch =
            orchestrator(config, recorder.clone(), Arc::new(Bowl)).with_cancellation(token);

        let err = orch.run(&data(), &data()).unwrap_err();
        assert!(matches!(err, OrchestrationError::Cancelled { trials_recorded: 5 }));
        assert_eq!(orch.phase(), SearchPhase::Aborted);

        let parent = search_run(&*recorder);
        assert_eq!(parent.status(), RunStatus::Aborted);
        assert_eq!(parent.tag(TAG_STATUS_REASON), Some("cancelled"));
        let kids = children(&*recorder, parent.id());
        assert_eq!(kids.len(), 5);
        assert!(kids.iter().all(|k| k.status() == RunStatus::Completed));
    }

    #[test]
    fn parallel_search_records_every_trial() {
        let recorder = Arc::new(InMemoryRecorder::new());
        let config = SearchConfig::default()
            .with_budget(10)
            .with_concurrency(3)
            .with_strategy(StrategyConfig::Random);
        let mut orch = orchestrator(config, recorder.clone(), Arc::new(Bowl));

        let report = orch.run(&data(), &data()).unwrap();
        assert_eq!(report.state.len(), 10);
        assert_eq!(recorder.get_run(report.search_run_id).unwrap().tag("concurrency"), Some("3"));

        let mut numbers: Vec<usize> = report.state.trials().iter().map(|t| t.trial_number).collect();
        numbers.sort_unstable();
        assert_eq!(numbers, (0..10).collect::<Vec<_>>());

        let kids = children(&*recorder, report.search_run_id);
        assert_eq!(kids.len(), 10);
        assert!(kids.iter().all(|k| k.status() == RunStatus::Completed));
    }

    #[test]
    fn parallel_cancellation_seals_everything() {
        let token = CancellationToken::new();
        let trainer = CancelsAfter {
            calls: AtomicUsize::new(0),
            after: 3,
            token: token.clone(),
        };
        let recorder = Arc::new(InMemoryRecorder::new());
        let config = SearchConfig::default().with_budget(12).with_concurrency(2);
        let mut orch =
            orchestrator(config, recorder.clone(), Arc::new(trainer)).with_cancellation(token);

        let err = orch.run(&data(), &data()).unwrap_err();
        assert!(matches!(err, OrchestrationError::Cancelled { .. }));

        let parent = search_run(&*recorder);
        assert_eq!(parent.status(), RunStatus::Aborted);
        let kids = children(&*recorder, parent.id());
        assert!(kids.len() < 12);
        assert!(kids.iter().all(|k| k.is_sealed()));
        assert!(kids
            .iter()
            .any(|k| k.tag(TAG_STATUS_REASON) == Some("cancelled")));
    }
}
