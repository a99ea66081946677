//! Persistence layer: run history and the step context cache

pub mod cache;
pub mod codec;

#[cfg(feature = "sqlite")]
pub mod store;

pub use cache::{fingerprint, CacheEntry, CacheStore, FsCacheStore, InMemoryCacheStore};
pub use codec::{ArtifactCodec, JsonArtifactCodec};

#[cfg(feature = "sqlite")]
pub use store::SqliteRunRecorder;

use crate::core::{
    PipelineId, PipelineRun, Preview, RunId, RunLogLine, RunStatus, StepStatus, StepTransition,
};
use anyhow::{bail, Result};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Durable record of runs and their step transitions
///
/// Step transitions are append-only and the final run status is written
/// exactly once; once a run leaves `running` every further write fails.
#[async_trait::async_trait]
pub trait RunRecorder: Send + Sync {
    /// Create a running run with every listed step pending
    async fn create_run(&self, pipeline_id: PipelineId, orders: &[u32]) -> Result<RunId>;

    /// Record a step status change, with its preview or error message
    async fn update_step_status(
        &self,
        run_id: RunId,
        order: u32,
        status: StepStatus,
        payload: Option<&Preview>,
        error: Option<&str>,
    ) -> Result<()>;

    /// Set the terminal run status
    async fn finalize_run(&self, run_id: RunId, status: RunStatus) -> Result<()>;

    /// Append a timestamped line to the run log
    async fn append_log(&self, run_id: RunId, message: &str) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: RunId) -> Result<Option<PipelineRun>>;

    /// Runs of a pipeline, most recent first
    async fn list_runs(&self, pipeline_id: PipelineId) -> Result<Vec<PipelineRun>>;

    /// Pipelines with at least one recorded run
    async fn list_pipelines(&self) -> Result<Vec<PipelineId>>;

    /// Every recorded status transition of a run, in the order they happened
    async fn step_transitions(&self, run_id: RunId) -> Result<Vec<StepTransition>>;
}

#[derive(Default)]
struct MemoryState {
    runs: HashMap<RunId, PipelineRun>,
    transitions: HashMap<RunId, Vec<StepTransition>>,
    by_pipeline: HashMap<PipelineId, Vec<RunId>>,
}

/// In-memory run recorder (for testing or ephemeral use)
pub struct InMemoryRunRecorder {
    state: RwLock<MemoryState>,
}

impl InMemoryRunRecorder {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }
}

impl Default for InMemoryRunRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn running_run<'a>(runs: &'a mut HashMap<RunId, PipelineRun>, run_id: RunId) -> Result<&'a mut PipelineRun> {
    let Some(run) = runs.get_mut(&run_id) else {
        bail!("Unknown run {}", run_id);
    };
    if run.status != RunStatus::Running {
        bail!("Run {} is already {}", run_id, run.status);
    }
    Ok(run)
}

#[async_trait::async_trait]
impl RunRecorder for InMemoryRunRecorder {
    async fn create_run(&self, pipeline_id: PipelineId, orders: &[u32]) -> Result<RunId> {
        let run = PipelineRun::start(pipeline_id, orders);
        let run_id = run.id;

        let mut state = self.state.write().await;
        state.by_pipeline.entry(pipeline_id).or_default().push(run_id);
        state.transitions.insert(
            run_id,
            run.steps
                .iter()
                .map(|s| StepTransition {
                    order: s.order,
                    status: StepStatus::Pending,
                    at: run.started_at,
                })
                .collect(),
        );
        state.runs.insert(run_id, run);
        Ok(run_id)
    }

    async fn update_step_status(
        &self,
        run_id: RunId,
        order: u32,
        status: StepStatus,
        payload: Option<&Preview>,
        error: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let run = running_run(&mut state.runs, run_id)?;
        let Some(step) = run.step_mut(order) else {
            bail!("Run {} has no step {}", run_id, order);
        };

        let now = Utc::now();
        step.status = status;
        step.updated_at = now;
        if let Some(payload) = payload {
            step.payload = Some(payload.clone());
        }
        if let Some(error) = error {
            step.error = Some(error.to_string());
        }

        state
            .transitions
            .entry(run_id)
            .or_default()
            .push(StepTransition { order, status, at: now });
        Ok(())
    }

    async fn finalize_run(&self, run_id: RunId, status: RunStatus) -> Result<()> {
        if !status.is_terminal() {
            bail!("Cannot finalize run {} as {}", run_id, status);
        }
        let mut state = self.state.write().await;
        let run = running_run(&mut state.runs, run_id)?;
        run.status = status;
        run.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn append_log(&self, run_id: RunId, message: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(run) = state.runs.get_mut(&run_id) else {
            bail!("Unknown run {}", run_id);
        };
        run.logs.push(RunLogLine {
            at: Utc::now(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn load_run(&self, run_id: RunId) -> Result<Option<PipelineRun>> {
        let state = self.state.read().await;
        Ok(state.runs.get(&run_id).cloned())
    }

    async fn list_runs(&self, pipeline_id: PipelineId) -> Result<Vec<PipelineRun>> {
        let state = self.state.read().await;
        let Some(ids) = state.by_pipeline.get(&pipeline_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| state.runs.get(id).cloned())
            .collect())
    }

    async fn list_pipelines(&self) -> Result<Vec<PipelineId>> {
        let state = self.state.read().await;
        let mut ids: Vec<PipelineId> = state.by_pipeline.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn step_transitions(&self, run_id: RunId) -> Result<Vec<StepTransition>> {
        let state = self.state.read().await;
        Ok(state.transitions.get(&run_id).cloned().unwrap_or_default())
    }
}
