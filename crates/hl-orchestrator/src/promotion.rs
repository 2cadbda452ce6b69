//! Hand the winning trial to the model registry.

use tracing::info;

use hl_tracking::{ModelMetadata, ModelRegistry, ServableHandle};
use hl_types::RegistryError;

use crate::orchestrator::SearchReport;

/// Register the best trial's artifact under `model_name`.
///
/// Refuses with [`RegistryError::NoUsableModel`] when the best score is not
/// finite or the best trial left no artifact, i.e. when every trial failed.
pub fn promote_best(
    report: &SearchReport,
    registry: &dyn ModelRegistry,
    model_name: &str,
) -> Result<ServableHandle, RegistryError> {
    let best = &report.best;
    let no_usable_model = || RegistryError::NoUsableModel {
        failed: report.failed,
        budget: report.budget,
        best_score: best.score,
    };
    if !best.score.is_finite() {
        return Err(no_usable_model());
    }
    let artifact = best.artifact.as_ref().ok_or_else(no_usable_model)?;

    let metadata = ModelMetadata {
        model_name: model_name.to_string(),
        run_id: best.run_id,
        search_run_id: report.search_run_id,
        objective: report.objective.clone(),
        score: best.score,
        configuration: best.configuration.clone(),
    };
    let handle = registry.register(artifact, &metadata)?;
    info!(
        "Promoted trial {} ({} = {}) as {} v{}",
        best.trial_number, report.objective, best.score, handle.name, handle.version
    );
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hl_tracking::InMemoryModelRegistry;
    use hl_types::{ArtifactRef, Configuration, RunId, SearchState, TrialResult, TrialStatus};

    fn trial(n: usize, score: f64, artifact: bool) -> TrialResult {
        TrialResult {
            trial_number: n,
            configuration: Configuration::new(),
            score,
            artifact: artifact.then(|| ArtifactRef {
                uri: format!("memory://trial-{n}/model"),
                media_type: "application/json".into(),
                size_bytes: 2,
            }),
            run_id: RunId::new_v4(),
            status: if score.is_finite() {
                TrialStatus::Completed
            } else {
                TrialStatus::Failed
            },
            error: None,
            duration_ms: 1,
        }
    }

    fn report(trials: Vec<TrialResult>) -> SearchReport {
        let mut state = SearchState::new();
        for t in trials {
            state.push(t);
        }
        let best = state.best().cloned().unwrap();
        SearchReport {
            search_run_id: RunId::new_v4(),
            objective: "rmse".into(),
            best,
            succeeded: state.succeeded(),
            failed: state.failed(),
            budget: state.len(),
            state,
        }
    }

    #[test]
    fn promotes_the_best_trial() {
        let report = report(vec![trial(0, 0.9, true), trial(1, 0.4, true), trial(2, 0.4, true)]);
        let registry = InMemoryModelRegistry::new();

        let handle = promote_best(&report, &registry, "wine").unwrap();
        assert_eq!(handle.version, 1);

        let latest = registry.latest("wine").unwrap();
        assert_eq!(latest.metadata.run_id, report.state.trials()[1].run_id);
        assert_eq!(latest.metadata.score, 0.4);
        assert_eq!(latest.metadata.search_run_id, report.search_run_id);
    }

    #[test]
    fn refuses_when_every_trial_failed() {
        let report = report(vec![trial(0, f64::INFINITY, false), trial(1, f64::INFINITY, false)]);
        let registry = InMemoryModelRegistry::new();

        let err = promote_best(&report, &registry, "wine").unwrap_err();
        assert!(matches!(err, RegistryError::NoUsableModel { failed: 2, budget: 2, .. }));
        assert!(registry.versions("wine").is_empty());
    }

    #[test]
    fn refuses_without_artifact() {
        let report = report(vec![trial(0, 0.1, false)]);
        let err = promote_best(&report, &InMemoryModelRegistry::new(), "wine").unwrap_err();
        assert!(matches!(err, RegistryError::NoUsableModel { .. }));
    }
}
