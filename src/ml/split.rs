use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::features::LabeledSet;

#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub x_train: Array2<f64>,
    pub y_train: Array1<f64>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<f64>,
}

/// Shuffled split with a fixed seed; the same input always yields the same
/// partitions. The test partition gets `ceil(n * test_ratio)` rows.
pub fn train_test_split(set: &LabeledSet, test_ratio: f64, seed: u64) -> TrainTestSplit {
    let n = set.len();
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let n_test = ((n as f64 * test_ratio).ceil() as usize).min(n);
    let (test_idx, train_idx) = indices.split_at(n_test);

    TrainTestSplit {
        x_train: set.x.select(Axis(0), train_idx),
        y_train: set.y.select(Axis(0), train_idx),
        x_test: set.x.select(Axis(0), test_idx),
        y_test: set.y.select(Axis(0), test_idx),
    }
}
