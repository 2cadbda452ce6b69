use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};

use hl_types::{Configuration, ParameterValue, TrialResult};

use crate::space::SearchSpace;
use crate::strategy::ProposalEngine;

/// Walks the Cartesian grid in order, then falls back to random draws.
///
/// Only the per-parameter axes are materialised, on the first proposal; the
/// grid point for `cursor` is decoded from them as a mixed-radix number with
/// the last parameter varying fastest.
#[derive(Debug, Clone)]
pub struct GridSearch {
    /// Number of steps for continuous dimensions.
    steps: usize,
    cursor: usize,
    grid: Option<Grid>,
    rng: ChaCha8Rng,
}

#[derive(Debug, Clone)]
struct Grid {
    axes: Vec<(String, Vec<ParameterValue>)>,
    /// `None` when the point count overflows; such a grid is never walked.
    size: Option<usize>,
}

impl Grid {
    fn new(space: &SearchSpace, steps: usize) -> Self {
        let axes = space
            .parameters()
            .iter()
            .map(|param| (param.name.clone(), param.grid_values(steps)))
            .collect();
        Self {
            axes,
            size: space.grid_size(steps),
        }
    }

    fn point(&self, mut index: usize) -> Configuration {
        let mut config = Configuration::new();
        for (name, values) in self.axes.iter().rev() {
            let radix = values.len();
            config.insert(name.clone(), values[index % radix].clone());
            index /= radix;
        }
        config
    }
}

impl GridSearch {
    pub fn new(steps: usize, seed: u64) -> Self {
        Self {
            steps: steps.max(2),
            cursor: 0,
            grid: None,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Grid points not yet proposed. `None` before the first proposal or
    /// when the grid is too large to walk.
    pub fn remaining(&self) -> Option<usize> {
        self.grid
            .as_ref()
            .and_then(|grid| grid.size)
            .map(|size| size.saturating_sub(self.cursor))
    }
}

impl ProposalEngine for GridSearch {
    fn propose(&mut self, space: &SearchSpace, _history: &[TrialResult]) -> Configuration {
        let steps = self.steps;
        let grid = self.grid.get_or_insert_with(|| {
            let grid = Grid::new(space, steps);
            match grid.size {
                Some(size) => debug!("Search grid has {} points", size),
                None => warn!("Search grid is too large to enumerate; sampling randomly"),
            }
            grid
        });

        match grid.size {
            Some(size) if self.cursor < size => {
                let config = grid.point(self.cursor);
                self.cursor += 1;
                config
            }
            _ => space.sample(&mut self.rng),
        }
    }

    fn name(&self) -> &str {
        "grid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_space() -> SearchSpace {
        SearchSpace::builder()
            .add_int("a", 1, 3)
            .add_categorical("act", vec![json!("relu"), json!("tanh")])
            .build()
            .unwrap()
    }

    #[test]
    fn walks_every_grid_point_once() {
        let space = sample_space();
        let mut grid = GridSearch::new(5, 0);
        let proposals: Vec<_> = (0..6).map(|_| grid.propose(&space, &[])).collect();

        assert_eq!(space.grid_size(5), Some(6));
        for (i, a) in proposals.iter().enumerate() {
            for b in &proposals[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(proposals[0]["a"], ParameterValue::Int(1));
        assert_eq!(grid.remaining(), Some(0));
    }

    #[test]
    fn falls_back_to_random_when_exhausted() {
        let space = sample_space();
        let mut grid = GridSearch::new(5, 0);
        for _ in 0..6 {
            grid.propose(&space, &[]);
        }
        for _ in 0..20 {
            let config = grid.propose(&space, &[]);
            space.validate(&config).unwrap();
        }
    }

    #[test]
    fn continuous_axes_use_requested_steps() {
        let space = SearchSpace::builder()
            .add_uniform("x", 0.0, 1.0)
            .add_uniform("y", 0.0, 1.0)
            .build()
            .unwrap();
        let mut grid = GridSearch::new(3, 0);
        let first = grid.propose(&space, &[]);
        assert_eq!(first["x"], ParameterValue::Float(0.0));
        assert_eq!(grid.remaining(), Some(8));
    }

    #[test]
    fn large_grid_is_walked_without_enumerating_it() {
        let mut builder = SearchSpace::builder();
        for i in 0..12 {
            builder = builder.add_uniform(format!("x{i}"), 0.0, 1.0);
        }
        let space = builder.build().unwrap();
        let mut grid = GridSearch::new(5, 0);

        let first = grid.propose(&space, &[]);
        let second = grid.propose(&space, &[]);
        assert_eq!(grid.remaining(), Some(5usize.pow(12) - 2));
        assert!(first.values().all(|v| *v == ParameterValue::Float(0.0)));
        assert_eq!(second["x11"], ParameterValue::Float(0.25));
        assert_eq!(second["x0"], ParameterValue::Float(0.0));
    }

    #[test]
    fn overflowing_grid_samples_randomly() {
        let mut builder = SearchSpace::builder();
        for i in 0..64 {
            builder = builder.add_uniform(format!("x{i}"), 0.0, 1.0);
        }
        let space = builder.build().unwrap();
        assert_eq!(space.grid_size(5), None);

        let mut grid = GridSearch::new(5, 0);
        for _ in 0..3 {
            space.validate(&grid.propose(&space, &[])).unwrap();
        }
        assert_eq!(grid.remaining(), None);
    }
}
