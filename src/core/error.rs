//! Engine error taxonomy

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the execution engine
///
/// Step-level variants are caught at the step boundary and recorded on the
/// run (or returned in a preview); they never escape `PipelineEngine::run`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed or missing step configuration, or a required context slot is absent
    #[error("config error: {0}")]
    Config(String),

    /// A data source or sink could not be reached
    #[error("connection error: {0}")]
    Connection(String),

    /// The preprocessing script raised
    #[error("transform error: {0}")]
    Transform(String),

    #[error("training error: {0}")]
    Training(String),

    #[error("prediction error: {0}")]
    Prediction(String),

    /// Missing or corrupt cached artifact
    #[error("cache error: {0}")]
    Cache(String),

    /// Invalid schedule configuration
    #[error("schedule conflict: {0}")]
    ScheduleConflict(String),

    /// The run recorder backend failed
    #[error("run record error: {0}")]
    Record(String),
}

/// Serializable tag for an [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Connection,
    Transform,
    Training,
    Prediction,
    Cache,
    ScheduleConflict,
    Record,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Config(_) => ErrorKind::Config,
            EngineError::Connection(_) => ErrorKind::Connection,
            EngineError::Transform(_) => ErrorKind::Transform,
            EngineError::Training(_) => ErrorKind::Training,
            EngineError::Prediction(_) => ErrorKind::Prediction,
            EngineError::Cache(_) => ErrorKind::Cache,
            EngineError::ScheduleConflict(_) => ErrorKind::ScheduleConflict,
            EngineError::Record(_) => ErrorKind::Record,
        }
    }

    /// Wrap a recorder failure, keeping the full anyhow context chain
    pub fn record(err: anyhow::Error) -> Self {
        EngineError::Record(format!("{:#}", err))
    }
}
