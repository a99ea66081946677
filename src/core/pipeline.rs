//! Pipeline domain model

use crate::core::{
    error::EngineError,
    schedule::ScheduleConfig,
    state::PipelineId,
    step::PipelineStep,
};
use serde::{Deserialize, Serialize};

/// An ordered sequence of typed steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Steps, ascending by order
    pub steps: Vec<PipelineStep>,

    /// Optional time-based trigger
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

impl Pipeline {
    /// Create a pipeline; steps are sorted by order but not validated
    pub fn new(id: PipelineId, name: impl Into<String>, mut steps: Vec<PipelineStep>) -> Self {
        steps.sort_by_key(|s| s.order);
        Self {
            id,
            name: name.into(),
            description: None,
            steps,
            schedule: None,
        }
    }

    pub fn with_schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Check that step orders are exactly 0..N-1
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Config(format!(
                "pipeline {} has an empty name",
                self.id
            )));
        }

        if let Some(pair) = self.steps.windows(2).find(|w| w[0].order > w[1].order) {
            return Err(EngineError::Config(format!(
                "pipeline '{}': steps not in ascending order, order {} ('{}') listed before order {} ('{}')",
                self.name, pair[0].order, pair[0].name, pair[1].order, pair[1].name
            )));
        }

        for (expected, step) in self.steps.iter().enumerate() {
            let expected = expected as u32;
            if step.order != expected {
                let problem = if step.order < expected {
                    "duplicate"
                } else {
                    "gap before"
                };
                return Err(EngineError::Config(format!(
                    "pipeline '{}': step orders must be contiguous from 0, found {} order {} ('{}')",
                    self.name, problem, step.order, step.name
                )));
            }
        }

        if let Some(schedule) = &self.schedule {
            schedule.validate()?;
        }

        Ok(())
    }

    pub fn step(&self, order: u32) -> Option<&PipelineStep> {
        self.steps.iter().find(|s| s.order == order)
    }

    pub fn orders(&self) -> Vec<u32> {
        self.steps.iter().map(|s| s.order).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
