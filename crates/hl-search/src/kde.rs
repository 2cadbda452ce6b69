//! Gaussian kernel density estimation over one dimension.

use rand::Rng;

/// Bandwidth never drops below this fraction of the domain width.
const MIN_BANDWIDTH_FRACTION: f64 = 0.01;
/// Bandwidth used when every observation sits on the same point.
const DEGENERATE_BANDWIDTH_FRACTION: f64 = 0.1;

/// Gaussian KDE over a bounded interval `[low, high]`, bandwidth chosen by
/// Scott's rule.
#[derive(Debug, Clone)]
pub(crate) struct KernelDensity {
    samples: Vec<f64>,
    bandwidth: f64,
}

impl KernelDensity {
    /// `None` when there are no samples.
    pub(crate) fn fit(samples: Vec<f64>, low: f64, high: f64) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let width = high - low;
        let std_dev = std_dev(&samples);
        let bandwidth = if std_dev < f64::EPSILON {
            width * DEGENERATE_BANDWIDTH_FRACTION
        } else {
            let n = samples.len() as f64;
            (n.powf(-0.2) * std_dev).max(width * MIN_BANDWIDTH_FRACTION)
        };
        Some(Self { samples, bandwidth })
    }

    pub(crate) fn pdf(&self, x: f64) -> f64 {
        let n = self.samples.len() as f64;
        let inv_bandwidth = 1.0 / self.bandwidth;
        let normalization = inv_bandwidth / (2.0 * std::f64::consts::PI).sqrt();

        let density: f64 = self
            .samples
            .iter()
            .map(|&xi| {
                let z = (x - xi) * inv_bandwidth;
                normalization * (-0.5 * z * z).exp()
            })
            .sum();

        density / n
    }

    /// Pick a kernel center uniformly, then add Box-Muller noise.
    pub(crate) fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        let idx = rng.random_range(0..self.samples.len());
        let center = self.samples[idx];

        // random() is in [0, 1); keep u1 away from zero for the log
        let u1: f64 = 1.0 - rng.random::<f64>();
        let u2: f64 = rng.random();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        center + z * self.bandwidth
    }

    #[cfg(test)]
    pub(crate) fn bandwidth(&self) -> f64 {
        self.bandwidth
    }
}

fn std_dev(samples: &[f64]) -> f64 {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn empty_samples_yield_nothing() {
        assert!(KernelDensity::fit(vec![], 0.0, 1.0).is_none());
    }

    #[test]
    fn density_peaks_near_samples() {
        let kde = KernelDensity::fit(vec![0.2, 0.25, 0.3], 0.0, 1.0).unwrap();
        assert!(kde.pdf(0.25) > kde.pdf(0.9));
        assert!(kde.pdf(0.25) > 0.0);
    }

    #[test]
    fn identical_samples_get_domain_scaled_bandwidth() {
        let kde = KernelDensity::fit(vec![5.0, 5.0], 0.0, 10.0).unwrap();
        assert!((kde.bandwidth() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn samples_cluster_around_centers() {
        let kde = KernelDensity::fit(vec![0.5], 0.0, 1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let draws: Vec<f64> = (0..2_000).map(|_| kde.sample(&mut rng)).collect();
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        assert!((mean - 0.5).abs() < 0.02, "mean {mean}");
        assert!(draws.iter().all(|d| d.is_finite()));
    }
}
