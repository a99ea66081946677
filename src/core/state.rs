//! Run and step state models

use crate::core::{error::ErrorKind, step::StepType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type RunId = Uuid;
pub type PipelineId = i64;

/// Overall pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    /// Once terminal, a run is immutable
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// Status of a single step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Not executed because an earlier step failed
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "running" => Ok(StepStatus::Running),
            "succeeded" => Ok(StepStatus::Succeeded),
            "failed" => Ok(StepStatus::Failed),
            "skipped" => Ok(StepStatus::Skipped),
            other => Err(format!("unknown step status '{}'", other)),
        }
    }
}

/// Shape-tagged preview of a step result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Preview {
    /// Dataframe-like preview: row count, columns and the first rows as records
    Table {
        rows: usize,
        columns: Vec<String>,
        data: Vec<Map<String, Value>>,
    },
    Json {
        data: Value,
    },
    Text {
        data: String,
    },
}

/// Result of one step in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub order: u32,
    pub status: StepStatus,
    pub payload: Option<Preview>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StepResult {
    pub fn pending(order: u32) -> Self {
        Self {
            order,
            status: StepStatus::Pending,
            payload: None,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

/// One append-only status transition of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTransition {
    pub order: u32,
    pub status: StepStatus,
    pub at: DateTime<Utc>,
}

/// Timestamped line of a run's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogLine {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// A run of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub pipeline_id: PipelineId,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// One entry per step, ascending by order
    pub steps: Vec<StepResult>,
    #[serde(default)]
    pub logs: Vec<RunLogLine>,
}

impl PipelineRun {
    /// Start a new run with every step pending
    pub fn start(pipeline_id: PipelineId, orders: &[u32]) -> Self {
        let mut orders = orders.to_vec();
        orders.sort_unstable();
        Self {
            id: Uuid::new_v4(),
            pipeline_id,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            steps: orders.into_iter().map(StepResult::pending).collect(),
            logs: Vec::new(),
        }
    }

    pub fn step(&self, order: u32) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.order == order)
    }

    pub fn step_mut(&mut self, order: u32) -> Option<&mut StepResult> {
        self.steps.iter_mut().find(|s| s.order == order)
    }

    /// The step that stopped the run, if any
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Fraction of steps in a terminal state (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let done = self.steps.iter().filter(|s| s.status.is_terminal()).count();
        done as f64 / self.steps.len() as f64
    }
}

/// Outcome of a standalone step test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResult {
    pub pipeline_id: PipelineId,
    pub order: u32,
    pub step_type: StepType,
    pub preview: Option<Preview>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Fingerprint of the cache entry written by the test
    pub fingerprint: Option<String>,
}

impl PreviewResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
