use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Model output for a single feature row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// 1 = next close higher, 0 = not higher
    pub label: u8,
    /// Probability of label 1
    pub probability: f64,
}

impl Prediction {
    pub fn new(probability: f64) -> Self {
        Self {
            label: if probability >= 0.5 { 1 } else { 0 },
            probability,
        }
    }

    /// Probability assigned to the predicted label
    pub fn confidence(&self) -> f64 {
        if self.label == 1 { self.probability } else { 1.0 - self.probability }
    }
}

/// Directional recommendation from a strategy; never executed by the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalIntent {
    pub side: Side,
    pub confidence: f64,
    pub price: Option<f64>,
    pub reason: String,
}

impl SignalIntent {
    pub fn new(side: Side, confidence: f64, reason: &str) -> Self {
        Self {
            side,
            confidence,
            price: None,
            reason: reason.to_string(),
        }
    }

    pub fn at_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }
}
