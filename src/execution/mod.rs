//! Pipeline execution: step dispatch, the run engine and the trigger scheduler

pub mod engine;
pub mod executor;
pub mod scheduler;
pub mod steps;

pub use engine::{EventHandler, ExecutionEvent, PipelineEngine};
pub use executor::{StepExecution, StepExecutor};
pub use scheduler::{Clock, JobId, JobInfo, JobState, RunLauncher, Scheduler};
pub use steps::{handler_for, StepHandler};
