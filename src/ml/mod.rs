pub mod features;
pub mod model;
pub mod registry;
pub mod scheduler;
pub mod split;
pub mod validator;

pub use features::{FeatureEngine, TechnicalFeatureEngine};
pub use model::{LogisticLearner, Predictor};
pub use scheduler::{RetrainOutcome, RetrainScheduler};
pub use validator::PerformanceValidator;
