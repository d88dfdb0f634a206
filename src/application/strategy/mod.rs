pub mod engine;
pub mod stages;

pub use engine::{EvaluationResult, StrategyEngine};
pub use stages::StrategyParams;
