pub mod confidence;

pub use confidence::ConfidenceStrategy;

use anyhow::Result;
use crate::types::{Prediction, SignalIntent};

/// Turns model output into directional recommendations. Intents are
/// reported, never sized or executed here.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// `predictions` are ordered oldest first; the last entry is the newest
    fn decide(&self, predictions: &[Prediction]) -> Result<Vec<SignalIntent>>;
}
