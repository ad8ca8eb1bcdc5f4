use anyhow::{anyhow, Result};
use tracing::debug;

use super::Strategy;
use crate::types::{Prediction, SignalIntent, Side};

/// Confidence-gated strategy
/// Emits one BUY or SELL intent for the newest prediction when the model is
/// sure enough about its direction
pub struct ConfidenceStrategy {
    name: String,
    min_confidence: f64,
}

impl ConfidenceStrategy {
    pub fn new(min_confidence: f64) -> Self {
        Self {
            name: "ConfidenceGate".to_string(),
            min_confidence,
        }
    }
}

impl Default for ConfidenceStrategy {
    fn default() -> Self {
        Self::new(0.60)
    }
}

impl Strategy for ConfidenceStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(&self, predictions: &[Prediction]) -> Result<Vec<SignalIntent>> {
        let Some(latest) = predictions.last() else {
            return Ok(Vec::new());
        };
        if !(0.0..=1.0).contains(&latest.probability) {
            return Err(anyhow!("Probability out of range: {}", latest.probability));
        }

        let confidence = latest.confidence();
        if confidence < self.min_confidence {
            debug!(
                "{}: confidence {:.3} below {:.2}, no signal",
                self.name, confidence, self.min_confidence
            );
            return Ok(Vec::new());
        }

        let (side, reason) = if latest.label == 1 {
            (Side::Buy, format!("Model expects a higher close (p={:.3})", latest.probability))
        } else {
            (Side::Sell, format!("Model expects a lower close (p={:.3})", latest.probability))
        };
        Ok(vec![SignalIntent::new(side, confidence, &reason)])
    }
}
