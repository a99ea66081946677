//! mlpipeline - pipeline execution engine for an MLOps control plane
//!
//! Runs ordered extraction, preprocessing, training, prediction and save
//! steps, caches the context after every step so a single step can be
//! re-tested in isolation, records each run's history and fires pipelines
//! on daily or interval schedules.

pub mod capability;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use capability::{Capabilities, CapabilityError, ScriptCapabilities};
pub use core::{EngineError, ExecutionContext, Pipeline, PipelineRun, PipelineStep, StepKind};
pub use execution::{ExecutionEvent, PipelineEngine, Scheduler};
pub use persistence::{CacheStore, FsCacheStore, InMemoryRunRecorder, RunRecorder};
