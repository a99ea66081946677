//! Main execution engine - sequences steps, caches contexts and records runs

use crate::{
    capability::Capabilities,
    core::{
        EngineError, ExecutionContext, Pipeline, PipelineId, PipelineStep, Preview, PreviewResult,
        RunId, RunStatus, StepStatus, StepType,
    },
    execution::executor::{StepExecution, StepExecutor},
    persistence::{fingerprint, CacheEntry, CacheStore, RunRecorder},
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: RunId,
        pipeline_id: PipelineId,
        pipeline_name: String,
        total_steps: usize,
    },
    StepStarted {
        run_id: RunId,
        order: u32,
        name: String,
        step_type: StepType,
    },
    StepSucceeded {
        run_id: RunId,
        order: u32,
        preview: Preview,
    },
    StepFailed {
        run_id: RunId,
        order: u32,
        error: String,
    },
    StepSkipped {
        run_id: RunId,
        order: u32,
    },
    RunFinished {
        run_id: RunId,
        pipeline_id: PipelineId,
        status: RunStatus,
    },
    /// A standalone step test finished
    StepTested {
        pipeline_id: PipelineId,
        order: u32,
        ok: bool,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Pipeline execution engine
///
/// Runs and step tests of the same pipeline are serialized by a per-pipeline
/// lock; different pipelines execute concurrently.
pub struct PipelineEngine {
    executor: StepExecutor,
    cache: Arc<dyn CacheStore>,
    recorder: Arc<dyn RunRecorder>,
    locks: Mutex<HashMap<PipelineId, Arc<Mutex<()>>>>,
    event_handlers: Mutex<Vec<EventHandler>>,
}

impl PipelineEngine {
    pub fn new(
        capabilities: Capabilities,
        cache: Arc<dyn CacheStore>,
        recorder: Arc<dyn RunRecorder>,
    ) -> Self {
        Self {
            executor: StepExecutor::new(capabilities),
            cache,
            recorder,
            locks: Mutex::new(HashMap::new()),
            event_handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn recorder(&self) -> &Arc<dyn RunRecorder> {
        &self.recorder
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.lock().await.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    async fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self.event_handlers.lock().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    async fn pipeline_lock(&self, pipeline_id: PipelineId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(pipeline_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn log(&self, run_id: RunId, message: String) -> Result<(), EngineError> {
        self.recorder
            .append_log(run_id, &message)
            .await
            .map_err(EngineError::record)
    }

    async fn record_step(
        &self,
        run_id: RunId,
        order: u32,
        status: StepStatus,
        payload: Option<&Preview>,
        error: Option<&str>,
    ) -> Result<(), EngineError> {
        self.recorder
            .update_step_status(run_id, order, status, payload, error)
            .await
            .map_err(EngineError::record)
    }

    /// Run every step of the pipeline in order
    ///
    /// Step failures are recorded on the run (which then finishes `failed`)
    /// and never returned here. An invalid pipeline is rejected before a run
    /// is created. Recorder failures surface as [`EngineError::Record`]; once
    /// the run exists it is then finalized `failed` on a best-effort basis.
    pub async fn run(&self, pipeline: &Pipeline) -> Result<RunId, EngineError> {
        pipeline.validate()?;

        let lock = self.pipeline_lock(pipeline.id).await;
        let _guard = lock.lock().await;

        let run_id = self
            .recorder
            .create_run(pipeline.id, &pipeline.orders())
            .await
            .map_err(EngineError::record)?;

        info!(
            pipeline_id = pipeline.id,
            %run_id,
            "Starting pipeline run: {} ({} steps)",
            pipeline.name,
            pipeline.len()
        );
        self.emit_event(ExecutionEvent::RunStarted {
            run_id,
            pipeline_id: pipeline.id,
            pipeline_name: pipeline.name.clone(),
            total_steps: pipeline.len(),
        })
        .await;

        let status = match self.run_steps(pipeline, run_id).await {
            Ok(status) => status,
            Err(e) => {
                error!(pipeline_id = pipeline.id, %run_id, "Run aborted, recorder failed: {}", e);
                if let Err(finalize) = self.recorder.finalize_run(run_id, RunStatus::Failed).await {
                    warn!(%run_id, "Could not mark aborted run as failed: {:#}", finalize);
                }
                self.emit_event(ExecutionEvent::RunFinished {
                    run_id,
                    pipeline_id: pipeline.id,
                    status: RunStatus::Failed,
                })
                .await;
                return Err(e);
            }
        };

        info!(pipeline_id = pipeline.id, %run_id, "Pipeline run finished: {} - {}", pipeline.name, status);
        self.emit_event(ExecutionEvent::RunFinished {
            run_id,
            pipeline_id: pipeline.id,
            status,
        })
        .await;

        Ok(run_id)
    }

    /// Execute, record and finalize the steps of a created run
    async fn run_steps(&self, pipeline: &Pipeline, run_id: RunId) -> Result<RunStatus, EngineError> {
        self.log(run_id, format!("Pipeline '{}' run started", pipeline.name))
            .await?;

        let mut context = ExecutionContext::new();
        let mut parent: Option<String> = None;
        let mut failed = false;

        for step in &pipeline.steps {
            if failed {
                self.record_step(run_id, step.order, StepStatus::Skipped, None, None)
                    .await?;
                self.emit_event(ExecutionEvent::StepSkipped {
                    run_id,
                    order: step.order,
                })
                .await;
                continue;
            }

            self.record_step(run_id, step.order, StepStatus::Running, None, None)
                .await?;
            self.log(run_id, format!("{} started", step.label())).await?;
            self.emit_event(ExecutionEvent::StepStarted {
                run_id,
                order: step.order,
                name: step.name.clone(),
                step_type: step.step_type(),
            })
            .await;

            match self
                .execute_and_cache(pipeline.id, step, &context, parent.as_deref())
                .await
            {
                Ok((execution, fp)) => {
                    self.record_step(
                        run_id,
                        step.order,
                        StepStatus::Succeeded,
                        Some(&execution.preview),
                        None,
                    )
                    .await?;
                    self.log(run_id, format!("{} succeeded", step.label())).await?;
                    self.emit_event(ExecutionEvent::StepSucceeded {
                        run_id,
                        order: step.order,
                        preview: execution.preview,
                    })
                    .await;

                    context = execution.context;
                    parent = Some(fp);
                }
                Err(e) => {
                    let message = e.to_string();
                    error!(pipeline_id = pipeline.id, %run_id, "{} failed: {}", step.label(), message);
                    self.record_step(run_id, step.order, StepStatus::Failed, None, Some(&message))
                        .await?;
                    self.log(run_id, format!("{} failed: {}", step.label(), message))
                        .await?;
                    self.emit_event(ExecutionEvent::StepFailed {
                        run_id,
                        order: step.order,
                        error: message,
                    })
                    .await;
                    failed = true;
                }
            }
        }

        let status = if failed {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };
        self.log(run_id, format!("Pipeline '{}' run {}", pipeline.name, status))
            .await?;
        self.recorder
            .finalize_run(run_id, status)
            .await
            .map_err(EngineError::record)?;
        Ok(status)
    }

    /// Run the pipeline on its own task
    pub fn spawn_run(
        self: Arc<Self>,
        pipeline: Arc<Pipeline>,
    ) -> JoinHandle<Result<RunId, EngineError>> {
        tokio::spawn(async move { self.run(&pipeline).await })
    }

    /// Execute one step against the cached context of its predecessor
    ///
    /// Never fails: errors are reported in the returned [`PreviewResult`].
    /// On success the step's context is cached under `(pipeline_id, order)`.
    pub async fn test_step(
        &self,
        pipeline_id: PipelineId,
        order: u32,
        step: &PipelineStep,
    ) -> PreviewResult {
        let lock = self.pipeline_lock(pipeline_id).await;
        let _guard = lock.lock().await;

        info!(pipeline_id, order, "Testing {}", step.label());
        let outcome = self.test_step_locked(pipeline_id, order, step).await;

        let result = match outcome {
            Ok((execution, fp)) => PreviewResult {
                pipeline_id,
                order,
                step_type: step.step_type(),
                preview: Some(execution.preview),
                error: None,
                error_kind: None,
                fingerprint: Some(fp),
            },
            Err(e) => {
                warn!(pipeline_id, order, "Step test failed: {}", e);
                PreviewResult {
                    pipeline_id,
                    order,
                    step_type: step.step_type(),
                    preview: None,
                    error: Some(e.to_string()),
                    error_kind: Some(e.kind()),
                    fingerprint: None,
                }
            }
        };

        self.emit_event(ExecutionEvent::StepTested {
            pipeline_id,
            order,
            ok: result.is_ok(),
        })
        .await;
        result
    }

    async fn test_step_locked(
        &self,
        pipeline_id: PipelineId,
        order: u32,
        step: &PipelineStep,
    ) -> Result<(StepExecution, String), EngineError> {
        if step.order != order {
            return Err(EngineError::Config(format!(
                "{} cannot be tested at order {}",
                step.label(),
                order
            )));
        }

        let (input, parent) = if order == 0 {
            (ExecutionContext::new(), None)
        } else {
            match self.cache.get(pipeline_id, order - 1).await? {
                Some(entry) => (entry.snapshot, Some(entry.fingerprint)),
                None => {
                    return Err(EngineError::Cache(format!(
                        "no cached context for pipeline {} step {}; run the preceding steps first",
                        pipeline_id,
                        order - 1
                    )))
                }
            }
        };

        self.execute_and_cache(pipeline_id, step, &input, parent.as_deref())
            .await
    }

    /// Execute a step, cache its context and drop stale downstream entries
    async fn execute_and_cache(
        &self,
        pipeline_id: PipelineId,
        step: &PipelineStep,
        input: &ExecutionContext,
        parent: Option<&str>,
    ) -> Result<(StepExecution, String), EngineError> {
        let execution = self.executor.execute(step, input).await?;

        let fp = fingerprint(parent, &step.kind);
        let entry = CacheEntry {
            pipeline_id,
            order: step.order,
            step_type: step.step_type(),
            snapshot: execution.context.clone(),
            fingerprint: fp.clone(),
            parent_fingerprint: parent.map(str::to_string),
        };
        self.cache.put(&entry).await?;
        self.invalidate_downstream(pipeline_id, step.order, &fp)
            .await?;

        Ok((execution, fp))
    }

    /// Remove cached entries after `order` that were not computed from `fp`
    ///
    /// If the entry right after `order` was derived from `fp` the chain is
    /// intact and nothing is removed. Returns the number of removed entries.
    pub async fn invalidate_downstream(
        &self,
        pipeline_id: PipelineId,
        order: u32,
        fp: &str,
    ) -> Result<usize, EngineError> {
        let downstream: Vec<u32> = self
            .cache
            .orders(pipeline_id)
            .await?
            .into_iter()
            .filter(|o| *o > order)
            .collect();

        let Some(&next) = downstream.first() else {
            return Ok(0);
        };
        if next == order + 1 {
            match self.cache.get(pipeline_id, next).await {
                Ok(Some(entry)) if entry.parent_fingerprint.as_deref() == Some(fp) => return Ok(0),
                Ok(_) | Err(EngineError::Cache(_)) => {}
                Err(e) => return Err(e),
            }
        }

        for stale in &downstream {
            self.cache.remove(pipeline_id, *stale).await?;
        }
        debug!(
            pipeline_id,
            order,
            "Invalidated cached contexts for steps {:?}",
            downstream
        );
        Ok(downstream.len())
    }

    /// Cached orders whose entry no longer matches the pipeline's configuration
    pub async fn stale_entries(&self, pipeline: &Pipeline) -> Result<Vec<u32>, EngineError> {
        let mut expected = HashMap::new();
        let mut parent: Option<String> = None;
        for step in &pipeline.steps {
            let fp = fingerprint(parent.as_deref(), &step.kind);
            expected.insert(step.order, fp.clone());
            parent = Some(fp);
        }

        let mut stale = Vec::new();
        for order in self.cache.orders(pipeline.id).await? {
            let current = match self.cache.get(pipeline.id, order).await {
                Ok(Some(entry)) => expected.get(&order) == Some(&entry.fingerprint),
                Ok(None) => continue,
                Err(EngineError::Cache(_)) => false,
                Err(e) => return Err(e),
            };
            if !current {
                stale.push(order);
            }
        }
        Ok(stale)
    }
}
