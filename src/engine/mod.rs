pub mod controller;
pub mod orchestrator;
pub mod stats;

pub use controller::LoopController;
pub use orchestrator::Orchestrator;
