use ndarray::{s, Array1, Array2};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::features::FeatureEngine;
use super::model::Predictor;
use crate::config::ValidationSettings;
use crate::error::ValidationError;
use crate::types::PricePoint;

/// Accuracy assumed before any validation pass and after a reset
pub const OPTIMISTIC_ACCURACY: f64 = 1.0;

/// One replayed historical row
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationSample {
    pub true_label: u8,
    pub predicted_label: u8,
}

impl ValidationSample {
    pub fn is_correct(&self) -> bool {
        self.true_label == self.predicted_label
    }
}

/// Rolling accuracy estimate over the newest rows of the dataset.
///
/// The samples are rows the model may already have been trained on, so the
/// figure can be optimistic compared with live, unseen outcomes.
pub struct PerformanceValidator {
    features: Arc<dyn FeatureEngine>,
    threshold: f64,
    sample_size: usize,
    recent_accuracy: f64,
    history: Vec<f64>,
}

impl PerformanceValidator {
    pub fn new(features: Arc<dyn FeatureEngine>, settings: &ValidationSettings) -> Self {
        Self {
            features,
            threshold: settings.accuracy_threshold,
            sample_size: settings.validation_sample_size,
            recent_accuracy: OPTIMISTIC_ACCURACY,
            history: Vec::new(),
        }
    }

    pub fn recent_accuracy(&self) -> f64 {
        self.recent_accuracy
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Replay the newest labeled rows through `model` and record the hit
    /// rate. On any error the previous accuracy is kept.
    pub fn validate_recent_performance(
        &mut self,
        window: &[PricePoint],
        model: Option<&dyn Predictor>,
    ) -> Result<f64, ValidationError> {
        match self.sample(window, model) {
            Ok(samples) => {
                let correct = samples.iter().filter(|s| s.is_correct()).count();
                let accuracy = correct as f64 / samples.len() as f64;
                self.recent_accuracy = accuracy;
                self.history.push(accuracy);
                info!(
                    "Recent accuracy: {:.2}% ({}/{} samples)",
                    accuracy * 100.0,
                    correct,
                    samples.len()
                );
                Ok(accuracy)
            }
            Err(e) => {
                warn!("Error validating performance: {} (keeping {:.2})", e, self.recent_accuracy);
                Err(e)
            }
        }
    }

    fn sample(
        &self,
        window: &[PricePoint],
        model: Option<&dyn Predictor>,
    ) -> Result<Vec<ValidationSample>, ValidationError> {
        let model = model.ok_or(ValidationError::NoModel)?;
        if window.is_empty() {
            return Err(ValidationError::NoSamples);
        }

        let frame = self
            .features
            .generate(window)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?
            .drop_incomplete();
        let set = frame.labeled();
        if set.is_empty() {
            return Err(ValidationError::NoSamples);
        }

        let take = self.sample_size.min(set.len());
        let start = set.len() - take;
        let x: Array2<f64> = set.x.slice(s![start.., ..]).to_owned();
        let y: Array1<f64> = set.y.slice(s![start..]).to_owned();
        debug!("Validating on {} of {} labeled rows", take, set.len());

        x.rows()
            .into_iter()
            .zip(y.iter())
            .map(|(row, &label)| {
                let prediction = model
                    .predict(&row.to_vec())
                    .map_err(|e| ValidationError::Malformed(e.to_string()))?;
                Ok(ValidationSample {
                    true_label: if label >= 0.5 { 1 } else { 0 },
                    predicted_label: prediction.label,
                })
            })
            .collect()
    }

    pub fn needs_retraining(&self) -> bool {
        self.recent_accuracy < self.threshold
    }

    /// Back to the optimistic default with an empty history
    pub fn reset_metrics(&mut self) {
        self.recent_accuracy = OPTIMISTIC_ACCURACY;
        self.history.clear();
        info!("Performance metrics reset");
    }

    #[cfg(test)]
    pub(crate) fn set_recent_accuracy(&mut self, accuracy: f64) {
        self.recent_accuracy = accuracy;
    }
}
