//! Tree-structured Parzen Estimator.
//!
//! Finished trials are split at the `gamma` quantile of their scores into a
//! good group and a bad group. Each parameter gets a density for each group,
//! l(x) and g(x); candidates are drawn from l and the one with the highest
//! l(x)/g(x) is proposed. Failed trials (score `+inf`) always land in the bad
//! group.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use hl_types::{Configuration, ParameterValue, TrialResult};

use crate::kde::KernelDensity;
use crate::space::{ParameterKind, ParameterSpec, SearchSpace};
use crate::strategy::ProposalEngine;

#[derive(Debug, Clone)]
pub struct TpeSearch {
    gamma: f64,
    n_candidates: usize,
    n_startup_trials: usize,
    exploration_weight: f64,
    rng: ChaCha8Rng,
}

impl TpeSearch {
    pub fn new(seed: u64) -> Self {
        Self {
            gamma: 0.25,
            n_candidates: 24,
            n_startup_trials: 1,
            exploration_weight: 0.3,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Fraction of finite-scored trials treated as good. Clamped to (0, 1).
    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = if gamma.is_finite() {
            gamma.clamp(0.01, 0.99)
        } else {
            0.25
        };
        self
    }

    pub fn with_candidates(mut self, n: usize) -> Self {
        self.n_candidates = n.max(1);
        self
    }

    pub fn with_startup_trials(mut self, n: usize) -> Self {
        self.n_startup_trials = n.max(1);
        self
    }

    pub fn with_exploration_weight(mut self, weight: f64) -> Self {
        self.exploration_weight = if weight.is_finite() {
            weight.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Too little signal for a surrogate: explore with probability
    /// `exploration_weight`, otherwise perturb the best finite observation.
    fn degenerate(&mut self, space: &SearchSpace, best: Option<&TrialResult>) -> Configuration {
        match best {
            Some(best) if self.rng.random::<f64>() >= self.exploration_weight => {
                self.perturb(space, &best.configuration)
            }
            _ => space.sample(&mut self.rng),
        }
    }

    /// Small moves around `base`: +/-10% of the range for continuous values
    /// (in log space for log-uniform), +/-2 for integers.
    fn perturb(&mut self, space: &SearchSpace, base: &Configuration) -> Configuration {
        let mut perturbed = Configuration::new();

        for param in space.parameters() {
            let base_val = base.get(&param.name);
            let value = match (&param.kind, base_val) {
                (ParameterKind::Uniform { low, high }, Some(ParameterValue::Float(v))) => {
                    let noise = self.rng.random_range(-0.1..0.1) * (high - low);
                    ParameterValue::Float((v + noise).clamp(*low, *high))
                }
                (ParameterKind::IntRange { low, high }, Some(ParameterValue::Int(v))) => {
                    let delta: i64 = self.rng.random_range(-2..=2);
                    ParameterValue::Int(v.saturating_add(delta).clamp(*low, *high))
                }
                (ParameterKind::LogUniform { low, high }, Some(ParameterValue::Float(v)))
                    if *v > 0.0 =>
                {
                    let log_range = high.ln() - low.ln();
                    let noise = self.rng.random_range(-0.1..0.1) * log_range;
                    ParameterValue::Float((v.ln() + noise).exp().clamp(*low, *high))
                }
                _ => param.sample(&mut self.rng),
            };
            perturbed.insert(param.name.clone(), value);
        }

        perturbed
    }

    fn sample_parameter(
        &mut self,
        param: &ParameterSpec,
        good: &[&TrialResult],
        bad: &[&TrialResult],
    ) -> ParameterValue {
        let proposed = match &param.kind {
            ParameterKind::Uniform { low, high } => {
                let good = observed(good, &param.name, Some);
                let bad = observed(bad, &param.name, Some);
                self.sample_numeric(good, bad, *low, *high)
                    .map(|x| ParameterValue::Float(x.clamp(*low, *high)))
            }
            ParameterKind::LogUniform { low, high } => {
                let to_log = |v: f64| (v > 0.0).then(|| v.ln());
                let good = observed(good, &param.name, to_log);
                let bad = observed(bad, &param.name, to_log);
                self.sample_numeric(good, bad, low.ln(), high.ln())
                    .map(|x| ParameterValue::Float(x.exp().clamp(*low, *high)))
            }
            ParameterKind::IntRange { low, high } => {
                let good = observed(good, &param.name, Some);
                let bad = observed(bad, &param.name, Some);
                self.sample_numeric(good, bad, *low as f64, *high as f64)
                    .map(|x| ParameterValue::Int((x.round() as i64).clamp(*low, *high)))
            }
            ParameterKind::Categorical { choices } => {
                self.sample_categorical(param, choices.len(), good, bad)
            }
        };

        proposed.unwrap_or_else(|| param.sample(&mut self.rng))
    }

    /// Draw candidates from l and keep the one maximising l(x)/g(x).
    fn sample_numeric(&mut self, good: Vec<f64>, bad: Vec<f64>, low: f64, high: f64) -> Option<f64> {
        let l = KernelDensity::fit(good, low, high)?;
        let g = KernelDensity::fit(bad, low, high);
        let uniform = 1.0 / (high - low);

        let mut best: Option<(f64, f64)> = None;
        for _ in 0..self.n_candidates {
            let x = l.sample(&mut self.rng).clamp(low, high);
            let g_x = g.as_ref().map_or(uniform, |g| g.pdf(x)).max(f64::MIN_POSITIVE);
            let ratio = l.pdf(x) / g_x;
            if best.map_or(true, |(_, r)| ratio > r) {
                best = Some((x, ratio));
            }
        }
        best.map(|(x, _)| x)
    }

    /// Laplace-smoothed choice frequencies for each group.
    fn sample_categorical(
        &mut self,
        param: &ParameterSpec,
        n_choices: usize,
        good: &[&TrialResult],
        bad: &[&TrialResult],
    ) -> Option<ParameterValue> {
        let count = |trials: &[&TrialResult]| {
            let mut counts = vec![1.0_f64; n_choices];
            for trial in trials {
                if let Some(idx) = trial
                    .configuration
                    .get(&param.name)
                    .and_then(|v| param.choice_index(v))
                {
                    counts[idx] += 1.0;
                }
            }
            let total: f64 = counts.iter().sum();
            counts.into_iter().map(|c| c / total).collect::<Vec<_>>()
        };
        let l = count(good);
        let g = count(bad);

        let mut best: Option<(usize, f64)> = None;
        for _ in 0..self.n_candidates {
            let idx = weighted_index(&l, self.rng.random::<f64>());
            let ratio = l[idx] / g[idx];
            if best.map_or(true, |(_, r)| ratio > r) {
                best = Some((idx, ratio));
            }
        }

        let ParameterKind::Categorical { choices } = &param.kind else {
            return None;
        };
        best.and_then(|(idx, _)| choices.get(idx))
            .map(|v| ParameterValue::Json(v.clone()))
    }
}

/// Numeric values of `name` across `trials`, passed through `transform`.
fn observed(trials: &[&TrialResult], name: &str, transform: impl Fn(f64) -> Option<f64>) -> Vec<f64> {
    trials
        .iter()
        .filter_map(|t| t.configuration.get(name))
        .filter_map(ParameterValue::as_f64)
        .filter_map(transform)
        .filter(|v| v.is_finite())
        .collect()
}

/// Index whose cumulative probability first exceeds `u` (`u` in [0, 1)).
fn weighted_index(probabilities: &[f64], u: f64) -> usize {
    let mut cumulative = 0.0;
    for (idx, p) in probabilities.iter().enumerate() {
        cumulative += p;
        if u < cumulative {
            return idx;
        }
    }
    probabilities.len().saturating_sub(1)
}

impl ProposalEngine for TpeSearch {
    fn propose(&mut self, space: &SearchSpace, history: &[TrialResult]) -> Configuration {
        if history.len() < self.n_startup_trials {
            return space.sample(&mut self.rng);
        }

        let mut finite: Vec<&TrialResult> =
            history.iter().filter(|t| t.score.is_finite()).collect();
        // Stable sort: equal scores keep history order.
        finite.sort_by(|a, b| a.score.total_cmp(&b.score));

        if finite.len() < 2 {
            return self.degenerate(space, finite.first().copied());
        }

        let n_good = ((finite.len() as f64 * self.gamma).ceil() as usize).clamp(1, finite.len() - 1);
        let (good, rest) = finite.split_at(n_good);
        let bad: Vec<&TrialResult> = rest
            .iter()
            .copied()
            .chain(history.iter().filter(|t| !t.score.is_finite()))
            .collect();
        debug!(
            "TPE split: {} good, {} bad ({} failed)",
            good.len(),
            bad.len(),
            history.len() - finite.len()
        );

        space
            .parameters()
            .iter()
            .map(|param| (param.name.clone(), self.sample_parameter(param, good, &bad)))
            .collect()
    }

    fn name(&self) -> &str {
        "tpe"
    }
}
