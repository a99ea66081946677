//! Scheduler - fires pipeline runs on wall-clock triggers
//!
//! A single task owns every job. It sleeps until the earliest deadline,
//! dispatches the due runs on their own tasks and re-arms the jobs; it never
//! waits for a run to finish. Commands reach it over a channel, so starting
//! or stopping a job never races with a fire.

use crate::core::{EngineError, Pipeline, PipelineId, RunId, ScheduleConfig, Trigger};
use crate::execution::engine::PipelineEngine;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub type JobId = u64;

/// Source of wall-clock time, used to place daily triggers
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Something that can start a pipeline run
#[async_trait]
pub trait RunLauncher: Send + Sync {
    async fn launch(&self, pipeline: Arc<Pipeline>) -> Result<RunId, EngineError>;
}

#[async_trait]
impl RunLauncher for PipelineEngine {
    async fn launch(&self, pipeline: Arc<Pipeline>) -> Result<RunId, EngineError> {
        self.run(&pipeline).await
    }
}

/// Lifecycle of a scheduled job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for the next deadline
    Armed,
    /// Dispatching a run
    Firing,
    /// Stopped; never fires again
    Cancelled,
}

/// Snapshot of a scheduled job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInfo {
    pub id: JobId,
    pub pipeline_id: PipelineId,
    pub pipeline_name: String,
    pub trigger: Trigger,
    pub state: JobState,
    /// Runs dispatched so far
    pub fire_count: u64,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub next_fire_at: Option<DateTime<Utc>>,
}

struct Job {
    info: JobInfo,
    pipeline: Arc<Pipeline>,
    deadline: Instant,
}

enum Command {
    Start {
        id: JobId,
        pipeline: Arc<Pipeline>,
        trigger: Trigger,
        reply: oneshot::Sender<()>,
    },
    Stop {
        id: JobId,
        reply: oneshot::Sender<bool>,
    },
    List {
        reply: oneshot::Sender<Vec<JobInfo>>,
    },
    ClearCancelled {
        reply: oneshot::Sender<usize>,
    },
}

/// Time-based trigger scheduler
pub struct Scheduler {
    commands: mpsc::Sender<Command>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start the scheduler loop; must be called within a tokio runtime
    pub fn new(launcher: Arc<dyn RunLauncher>) -> Self {
        Self::with_clock(launcher, Arc::new(Utc::now))
    }

    /// Start the scheduler loop with an explicit wall clock
    pub fn with_clock(launcher: Arc<dyn RunLauncher>, clock: Clock) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(rx, launcher, clock, cancel.clone()));

        Self {
            commands: tx,
            next_id: AtomicU64::new(1),
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Arm a job for `pipeline`
    pub async fn start(
        &self,
        pipeline: Arc<Pipeline>,
        schedule: &ScheduleConfig,
    ) -> Result<JobId, EngineError> {
        if !schedule.enabled {
            return Err(EngineError::ScheduleConflict(format!(
                "schedule of pipeline '{}' is disabled",
                pipeline.name
            )));
        }
        schedule.validate()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply, ack) = oneshot::channel();
        self.send(Command::Start {
            id,
            pipeline,
            trigger: schedule.trigger,
            reply,
        })
        .await?;
        ack.await.map_err(|_| stopped())?;
        Ok(id)
    }

    /// Arm a job from the pipeline's own schedule
    pub async fn start_pipeline(&self, pipeline: Arc<Pipeline>) -> Result<JobId, EngineError> {
        let schedule = pipeline.schedule.ok_or_else(|| {
            EngineError::ScheduleConflict(format!("pipeline '{}' has no schedule", pipeline.name))
        })?;
        self.start(pipeline, &schedule).await
    }

    /// Cancel a job; returns false if it was unknown or already cancelled
    pub async fn stop(&self, id: JobId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Stop { id, reply }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// All known jobs, ascending by ID
    pub async fn jobs(&self) -> Vec<JobInfo> {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::List { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Forget cancelled jobs, returning how many were dropped
    pub async fn clear_cancelled(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::ClearCancelled { reply }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Stop the loop and wait for it to exit; runs already dispatched keep going
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Scheduler loop ended abnormally: {}", e);
            }
        }
    }

    async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands.send(command).await.map_err(|_| stopped())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn stopped() -> EngineError {
    EngineError::ScheduleConflict("scheduler is shut down".to_string())
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_loop(
    mut commands: mpsc::Receiver<Command>,
    launcher: Arc<dyn RunLauncher>,
    clock: Clock,
    cancel: CancellationToken,
) {
    let mut jobs: BTreeMap<JobId, Job> = BTreeMap::new();
    info!("Scheduler started");

    loop {
        let next_deadline = jobs
            .values()
            .filter(|j| j.info.state == JobState::Armed)
            .map(|j| j.deadline)
            .min();

        tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => handle_command(&mut jobs, command, &clock),
                None => break,
            },
            _ = wait_until(next_deadline) => fire_due(&mut jobs, &launcher, &clock),
        }
    }

    info!("Scheduler stopped with {} job(s)", jobs.len());
}

fn handle_command(jobs: &mut BTreeMap<JobId, Job>, command: Command, clock: &Clock) {
    match command {
        Command::Start {
            id,
            pipeline,
            trigger,
            reply,
        } => {
            let now = clock();
            let delay = trigger.first_delay(now);
            let next_fire_at = chrono::Duration::from_std(delay).ok().map(|d| now + d);

            info!(
                job_id = id,
                pipeline_id = pipeline.id,
                "Armed '{}' {}, first fire in {:?}",
                pipeline.name,
                trigger.describe(),
                delay
            );
            jobs.insert(
                id,
                Job {
                    info: JobInfo {
                        id,
                        pipeline_id: pipeline.id,
                        pipeline_name: pipeline.name.clone(),
                        trigger,
                        state: JobState::Armed,
                        fire_count: 0,
                        last_fired_at: None,
                        next_fire_at,
                    },
                    pipeline,
                    deadline: Instant::now() + delay,
                },
            );
            let _ = reply.send(());
        }
        Command::Stop { id, reply } => {
            let stopped = match jobs.get_mut(&id) {
                Some(job) if job.info.state != JobState::Cancelled => {
                    job.info.state = JobState::Cancelled;
                    job.info.next_fire_at = None;
                    info!(job_id = id, "Cancelled schedule of '{}'", job.info.pipeline_name);
                    true
                }
                _ => false,
            };
            let _ = reply.send(stopped);
        }
        Command::List { reply } => {
            let _ = reply.send(jobs.values().map(|j| j.info.clone()).collect());
        }
        Command::ClearCancelled { reply } => {
            let before = jobs.len();
            jobs.retain(|_, j| j.info.state != JobState::Cancelled);
            let _ = reply.send(before - jobs.len());
        }
    }
}

fn fire_due(jobs: &mut BTreeMap<JobId, Job>, launcher: &Arc<dyn RunLauncher>, clock: &Clock) {
    let now = Instant::now();
    for job in jobs.values_mut() {
        if job.info.state != JobState::Armed || job.deadline > now {
            continue;
        }

        job.info.state = JobState::Firing;
        job.info.fire_count += 1;
        job.info.last_fired_at = Some(clock());
        debug!(job_id = job.info.id, "Firing run #{} of '{}'", job.info.fire_count, job.info.pipeline_name);

        let launcher = launcher.clone();
        let pipeline = job.pipeline.clone();
        let job_id = job.info.id;
        tokio::spawn(async move {
            match launcher.launch(pipeline.clone()).await {
                Ok(run_id) => info!(job_id, %run_id, "Scheduled run of '{}' finished", pipeline.name),
                Err(e) => error!(job_id, "Scheduled run of '{}' failed to start: {}", pipeline.name, e),
            }
        });

        // Missed periods are skipped, not replayed
        let period = job.info.trigger.period();
        while job.deadline <= now {
            job.deadline += period;
        }
        let wall_delay = job.deadline - now;
        job.info.next_fire_at = chrono::Duration::from_std(wall_delay)
            .ok()
            .zip(job.info.last_fired_at)
            .map(|(d, fired)| fired + d);
        job.info.state = JobState::Armed;
    }
}
