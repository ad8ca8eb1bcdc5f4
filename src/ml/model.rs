use anyhow::{anyhow, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::Prediction;

/// A trained model that can score feature rows
pub trait Predictor: Send + Sync {
    fn name(&self) -> &str;

    fn predict(&self, features: &[f64]) -> Result<Prediction>;

    /// Fraction of rows whose predicted label matches `y`
    fn evaluate(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<f64> {
        if x.nrows() == 0 || x.nrows() != y.len() {
            return Err(anyhow!("Cannot evaluate on {} rows with {} labels", x.nrows(), y.len()));
        }
        let mut correct = 0;
        for (row, &label) in x.rows().into_iter().zip(y.iter()) {
            let prediction = self.predict(&row.to_vec())?;
            if f64::from(prediction.label) == label {
                correct += 1;
            }
        }
        Ok(correct as f64 / x.nrows() as f64)
    }

    /// Serialise the fitted parameters for the model registry
    fn to_json(&self) -> Result<String>;
}

/// Fits fresh predictors and restores persisted ones
pub trait Learner: Send + Sync {
    fn train(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Box<dyn Predictor>>;

    fn load(&self, json: &str) -> Result<Box<dyn Predictor>>;
}

/// Logistic regression coefficients plus the z-score parameters used in training
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelWeights {
    coefficients: Vec<f64>,
    intercept: f64,
    feature_means: Vec<f64>,
    feature_stds: Vec<f64>,
}

/// Logistic regression on z-scored features, fitted by gradient descent
#[derive(Debug, Clone)]
pub struct LogisticLearner {
    pub max_iter: usize,
    pub learning_rate: f64,
    pub l2: f64,
}

impl Default for LogisticLearner {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            learning_rate: 0.05,
            l2: 0.01,
        }
    }
}

impl LogisticLearner {
    fn fit(&self, features: &Array2<f64>, labels: &Array1<f64>) -> (Vec<f64>, f64) {
        let n = features.nrows();
        let num_features = features.ncols();

        let mut coefficients = vec![0.0; num_features];
        let mut intercept = 0.0;

        for _iter in 0..self.max_iter {
            let mut grad_coef = vec![0.0; num_features];
            let mut grad_intercept = 0.0;

            for (row, &label) in features.rows().into_iter().zip(labels.iter()) {
                let mut z = intercept;
                for j in 0..num_features {
                    z += coefficients[j] * row[j];
                }
                let error = sigmoid(z) - label;

                grad_intercept += error;
                for j in 0..num_features {
                    grad_coef[j] += error * row[j];
                }
            }

            intercept -= self.learning_rate * grad_intercept / n as f64;
            for j in 0..num_features {
                coefficients[j] -= self.learning_rate * (grad_coef[j] / n as f64 + self.l2 * coefficients[j]);
            }
        }

        (coefficients, intercept)
    }
}

impl Learner for LogisticLearner {
    fn train(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Box<dyn Predictor>> {
        let n = x.nrows();
        if n == 0 || n != y.len() {
            return Err(anyhow!("Cannot train on {} rows with {} labels", n, y.len()));
        }

        let means = x
            .mean_axis(Axis(0))
            .ok_or_else(|| anyhow!("Empty feature matrix"))?;
        let stds = x.std_axis(Axis(0), 0.0);

        let mut normalized = x.clone();
        for (j, mut column) in normalized.columns_mut().into_iter().enumerate() {
            let std = stds[j];
            if std > 1e-10 {
                column.mapv_inplace(|v| (v - means[j]) / std);
            } else {
                column.fill(0.0);
            }
        }

        let (coefficients, intercept) = self.fit(&normalized, y);
        let wins = y.iter().filter(|&&v| v >= 0.5).count();
        info!("Logistic model fitted: {} samples, {}/{} up days", n, wins, n);

        Ok(Box::new(LogisticModel {
            weights: ModelWeights {
                coefficients,
                intercept,
                feature_means: means.to_vec(),
                feature_stds: stds.to_vec(),
            },
        }))
    }

    fn load(&self, json: &str) -> Result<Box<dyn Predictor>> {
        Ok(Box::new(LogisticModel::from_json(json)?))
    }
}

#[derive(Debug, Clone)]
pub struct LogisticModel {
    weights: ModelWeights,
}

impl LogisticModel {
    pub fn from_json(json: &str) -> Result<Self> {
        let weights: ModelWeights = serde_json::from_str(json)?;
        let n = weights.coefficients.len();
        if weights.feature_means.len() != n || weights.feature_stds.len() != n {
            return Err(anyhow!("Inconsistent model weights"));
        }
        Ok(Self { weights })
    }
}

impl Predictor for LogisticModel {
    fn name(&self) -> &str {
        "logistic_regression"
    }

    fn predict(&self, features: &[f64]) -> Result<Prediction> {
        let w = &self.weights;
        if features.len() != w.coefficients.len() {
            return Err(anyhow!(
                "Expected {} features, got {}",
                w.coefficients.len(),
                features.len()
            ));
        }

        let mut z = w.intercept;
        for (j, &value) in features.iter().enumerate() {
            let std = w.feature_stds[j];
            let normalized = if std > 1e-10 {
                (value - w.feature_means[j]) / std
            } else {
                0.0
            };
            z += w.coefficients[j] * normalized;
        }

        let probability = sigmoid(z);
        debug!("Prediction: p(up)={:.3}", probability);
        Ok(Prediction::new(probability))
    }

    fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.weights)?)
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::array;

    /// Always predicts the same label
    pub(crate) struct FixedPredictor {
        pub label: u8,
    }

    impl Predictor for FixedPredictor {
        fn name(&self) -> &str {
            "fixed"
        }

        fn predict(&self, _features: &[f64]) -> Result<Prediction> {
            Ok(Prediction::new(if self.label == 1 { 0.9 } else { 0.1 }))
        }

        fn to_json(&self) -> Result<String> {
            Ok(format!("{{\"label\":{}}}", self.label))
        }
    }

    #[test]
    fn test_learns_separable_data() {
        let x = array![[0.0, 1.0], [0.2, 0.9], [0.1, 1.1], [1.0, 0.0], [0.9, 0.2], [1.1, 0.1]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];

        let model = LogisticLearner::default().train(&x, &y).unwrap();
        assert_eq!(model.evaluate(&x, &y).unwrap(), 1.0);
        assert_eq!(model.predict(&[1.0, 0.0]).unwrap().label, 1);
        assert_eq!(model.predict(&[0.0, 1.0]).unwrap().label, 0);
    }

    #[test]
    fn test_json_round_trip_preserves_predictions() {
        let x = array![[1.0, 5.0], [2.0, 4.0], [3.0, 3.0], [4.0, 2.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let learner = LogisticLearner::default();
        let model = learner.train(&x, &y).unwrap();

        let restored = learner.load(&model.to_json().unwrap()).unwrap();
        let a = model.predict(&[2.5, 3.5]).unwrap();
        let b = restored.predict(&[2.5, 3.5]).unwrap();
        assert!((a.probability - b.probability).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_wrong_width() {
        let x = array![[1.0], [2.0]];
        let y = array![0.0, 1.0];
        let model = LogisticLearner::default().train(&x, &y).unwrap();
        assert!(model.predict(&[1.0, 2.0]).is_err());
        assert!(LogisticLearner::default().train(&x, &array![1.0]).is_err());
    }

    #[test]
    fn test_default_evaluate() {
        let x = array![[0.0], [0.0], [0.0], [0.0]];
        let y = array![1.0, 1.0, 0.0, 1.0];
        assert_eq!(FixedPredictor { label: 1 }.evaluate(&x, &y).unwrap(), 0.75);
    }
}
