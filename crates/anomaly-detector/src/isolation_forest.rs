//! Isolation forest scoring.
//!
//! Anomalies sit in sparse regions of feature space and are isolated by
//! fewer random axis-aligned splits than normal points.

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{seq::index, Rng, SeedableRng};
use rayon::prelude::*;

use analysis_core::AnalysisError;

const EULER_GAMMA: f64 = 0.577_215_664_9;

#[derive(Debug, Clone)]
enum IsolationNode {
    Internal {
        feature: usize,
        threshold: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    root: IsolationNode,
}

impl IsolationTree {
    fn build(data: &DMatrix<f64>, rows: &[usize], max_depth: usize, rng: &mut StdRng) -> Self {
        Self {
            root: Self::build_node(data, rows, 0, max_depth, rng),
        }
    }

    fn build_node(
        data: &DMatrix<f64>,
        rows: &[usize],
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> IsolationNode {
        if depth >= max_depth || rows.len() <= 1 {
            return IsolationNode::Leaf { size: rows.len() };
        }

        let feature = rng.gen_range(0..data.ncols());
        let (min_val, max_val) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
            let v = data[(r, feature)];
            (lo.min(v), hi.max(v))
        });

        if (max_val - min_val).abs() < 1e-10 {
            return IsolationNode::Leaf { size: rows.len() };
        }

        let threshold = rng.gen_range(min_val..max_val);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.iter().partition(|&&r| data[(r, feature)] < threshold);

        if left_rows.is_empty() || right_rows.is_empty() {
            return IsolationNode::Leaf { size: rows.len() };
        }

        let left = Self::build_node(data, &left_rows, depth + 1, max_depth, rng);
        let right = Self::build_node(data, &right_rows, depth + 1, max_depth, rng);

        IsolationNode::Internal {
            feature,
            threshold,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn path_length(&self, data: &DMatrix<f64>, row: usize) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;
        loop {
            match node {
                IsolationNode::Leaf { size } => return depth as f64 + average_path_length(*size),
                IsolationNode::Internal {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if data[(row, *feature)] < *threshold { left } else { right };
                    depth += 1;
                }
            }
        }
    }
}

/// Average path length of an unsuccessful BST search over `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// An ensemble of isolation trees fitted on one cohort.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    pub n_estimators: usize,
    pub max_samples: usize,
    pub seed: u64,
    trees: Vec<IsolationTree>,
    sample_size: usize,
}

impl IsolationForest {
    pub fn new(n_estimators: usize, max_samples: usize, seed: u64) -> Self {
        Self {
            n_estimators,
            max_samples,
            seed,
            trees: Vec::new(),
            sample_size: 0,
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    /// Grow the trees. Tree `t` draws from its own generator seeded with
    /// `seed + t`, so the result does not depend on thread scheduling.
    pub fn fit(&mut self, data: &DMatrix<f64>) -> Result<(), AnalysisError> {
        let n_samples = data.nrows();
        if n_samples == 0 || data.ncols() == 0 {
            return Err(AnalysisError::EmptyCohort(
                "isolation forest needs at least one row and one feature".to_string(),
            ));
        }
        if self.n_estimators == 0 {
            return Err(AnalysisError::CalculationError(
                "isolation forest needs at least one tree".to_string(),
            ));
        }

        let sample_size = self.max_samples.clamp(1, n_samples);
        let max_depth = (sample_size as f64).log2().ceil() as usize;
        let seed = self.seed;

        self.trees = (0..self.n_estimators)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                let rows = index::sample(&mut rng, n_samples, sample_size).into_vec();
                IsolationTree::build(data, &rows, max_depth, &mut rng)
            })
            .collect();
        self.sample_size = sample_size;

        tracing::debug!(
            "Fitted isolation forest: {} trees, {} samples per tree, max depth {}",
            self.n_estimators,
            sample_size,
            max_depth
        );
        Ok(())
    }

    /// Anomaly score `2^(-E[h(x)] / c(psi))` per row; higher is more anomalous.
    pub fn score_samples(&self, data: &DMatrix<f64>) -> Vec<f64> {
        let c = average_path_length(self.sample_size);
        (0..data.nrows())
            .into_par_iter()
            .map(|row| {
                if !self.is_fitted() || c <= 0.0 {
                    return 0.5;
                }
                let avg_path = self
                    .trees
                    .iter()
                    .map(|tree| tree.path_length(data, row))
                    .sum::<f64>()
                    / self.trees.len() as f64;
                2.0_f64.powf(-avg_path / c)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outliers() -> DMatrix<f64> {
        let mut rng = StdRng::seed_from_u64(42);
        let n_normal = 100;
        let mut data = DMatrix::zeros(n_normal + 2, 2);

        for i in 0..n_normal {
            data[(i, 0)] = rng.gen_range(-1.0..1.0);
            data[(i, 1)] = rng.gen_range(-1.0..1.0);
        }

        data[(n_normal, 0)] = 10.0;
        data[(n_normal, 1)] = 10.0;
        data[(n_normal + 1, 0)] = -10.0;
        data[(n_normal + 1, 1)] = -10.0;
        data
    }

    #[test]
    fn test_far_points_score_highest() {
        let data = cluster_with_outliers();
        let mut forest = IsolationForest::new(100, 256, 42);
        forest.fit(&data).unwrap();
        let scores = forest.score_samples(&data);

        let max_normal = scores[..100].iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!(scores[100] > max_normal);
        assert!(scores[101] > max_normal);
    }

    #[test]
    fn test_same_seed_same_scores() {
        let data = cluster_with_outliers();
        let mut a = IsolationForest::new(50, 64, 7);
        let mut b = IsolationForest::new(50, 64, 7);
        a.fit(&data).unwrap();
        b.fit(&data).unwrap();
        assert_eq!(a.score_samples(&data), b.score_samples(&data));
    }

    #[test]
    fn test_empty_matrix_is_empty_cohort() {
        let mut forest = IsolationForest::new(10, 256, 42);
        let err = forest.fit(&DMatrix::zeros(0, 3)).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyCohort(_)));
        assert!(!forest.is_fitted());
    }

    #[test]
    fn test_unfitted_forest_scores_neutral() {
        let data = cluster_with_outliers();
        let mut forest = IsolationForest::new(10, 64, 42);
        assert!(forest.score_samples(&data).iter().all(|&s| s == 0.5));

        forest.fit(&data).unwrap();
        assert!(forest.is_fitted());
        assert!(forest.score_samples(&data).iter().any(|&s| s != 0.5));
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > average_path_length(16));
    }
}
