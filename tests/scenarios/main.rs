//! Scenario-based tests for mlpipeline

mod helpers;

mod failure_handling;
mod scheduling;
#[cfg(feature = "sqlite")]
mod sqlite_history;
mod step_testing;
mod success_chain;
