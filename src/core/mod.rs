//! Core domain models
//!
//! Pipelines, typed steps, the execution context threaded between them,
//! schedules, run state and the error taxonomy.

pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod schedule;
pub mod state;
pub mod step;

pub use context::*;
pub use error::*;
pub use pipeline::*;
pub use schedule::*;
pub use state::*;
pub use step::*;
