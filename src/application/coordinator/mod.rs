pub mod executors;
pub mod job_coordinator;

pub use executors::{BackfillExecutor, IncrementalExecutor, StrategyRunExecutor};
pub use job_coordinator::{
    CoordinatorConfig, CoordinatorMetricsSnapshot, JobCoordinator, JobExecutor, JobLifecycleEvent,
};
