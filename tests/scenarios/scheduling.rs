//! Test: Scheduling - daily and interval triggers on a paused clock

use crate::helpers::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mlpipeline::core::{
    EngineError, Pipeline, PipelineId, RunId, RunStatus, ScheduleConfig, UtcOffset,
};
use mlpipeline::execution::{Clock, JobState, RunLauncher, Scheduler};
use mlpipeline::persistence::RunRecorder;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Launcher recording when each pipeline was fired, in minutes since creation
struct Recording {
    origin: Instant,
    fires: Mutex<Vec<(PipelineId, u64)>>,
}

impl Recording {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            origin: Instant::now(),
            fires: Mutex::new(Vec::new()),
        })
    }

    fn minutes(&self, pipeline_id: PipelineId) -> Vec<u64> {
        self.fires
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == pipeline_id)
            .map(|(_, minute)| *minute)
            .collect()
    }
}

#[async_trait]
impl RunLauncher for Recording {
    async fn launch(&self, pipeline: Arc<Pipeline>) -> Result<RunId, EngineError> {
        let minute = (Instant::now() - self.origin).as_secs() / 60;
        self.fires.lock().unwrap().push((pipeline.id, minute));
        Ok(uuid::Uuid::new_v4())
    }
}

fn pipeline(id: PipelineId) -> Arc<Pipeline> {
    Arc::new(Pipeline::new(id, format!("pipeline-{}", id), vec![]))
}

fn fixed_clock(at: &str) -> Clock {
    let now = DateTime::parse_from_rfc3339(at).unwrap().with_timezone(&Utc);
    Arc::new(move || now)
}

const HOUR: u64 = 60 * 60;

/// An interval trigger fires every N hours after arming, never immediately
#[tokio::test(start_paused = true)]
async fn test_interval_trigger() {
    let launcher = Recording::new();
    let scheduler = Scheduler::new(launcher.clone());
    scheduler
        .start(pipeline(1), &ScheduleConfig::every_hours(3).unwrap())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(9 * HOUR + 60)).await;

    assert_eq!(launcher.minutes(1), vec![180, 360, 540]);
    let jobs = scheduler.jobs().await;
    assert_eq!(jobs[0].fire_count, 3);
    assert_eq!(jobs[0].state, JobState::Armed);
}

/// A daily trigger written in local time fires at the matching UTC time, then every 24h
#[tokio::test(start_paused = true)]
async fn test_daily_trigger_with_offset() {
    let launcher = Recording::new();
    let scheduler =
        Scheduler::with_clock(launcher.clone(), fixed_clock("2026-03-01T08:00:00Z"));

    // 14:30 at +05:30 is 09:00 UTC, one hour after the clock
    let schedule = ScheduleConfig::daily("14:30", UtcOffset::parse("+05:30").unwrap()).unwrap();
    scheduler.start(pipeline(2), &schedule).await.unwrap();

    tokio::time::sleep(Duration::from_secs(25 * HOUR + 60)).await;

    assert_eq!(launcher.minutes(2), vec![60, 60 + 24 * 60]);
}

/// Stopping one job leaves the others firing
#[tokio::test(start_paused = true)]
async fn test_stop_one_job() {
    let launcher = Recording::new();
    let scheduler = Scheduler::new(launcher.clone());
    let hourly = ScheduleConfig::every_hours(1).unwrap();
    let a = scheduler.start(pipeline(3), &hourly).await.unwrap();
    let b = scheduler.start(pipeline(4), &hourly).await.unwrap();

    tokio::time::sleep(Duration::from_secs(HOUR + 30 * 60)).await;
    assert!(scheduler.stop(a).await);

    tokio::time::sleep(Duration::from_secs(4 * HOUR)).await;

    assert_eq!(launcher.minutes(3), vec![60]);
    assert_eq!(launcher.minutes(4), vec![60, 120, 180, 240, 300]);

    let states: Vec<_> = scheduler.jobs().await.iter().map(|j| (j.id, j.state)).collect();
    assert_eq!(states, vec![(a, JobState::Cancelled), (b, JobState::Armed)]);
}

/// An interval of zero hours is rejected when the schedule is built
#[test]
fn test_zero_interval_rejected() {
    let err = ScheduleConfig::every_hours(0).unwrap_err();
    assert!(matches!(err, EngineError::ScheduleConflict(_)));
}

/// Scheduled fires start real runs through the engine
#[tokio::test(start_paused = true)]
async fn test_scheduled_runs_recorded() {
    let harness = Harness::new(MockCapabilities::new());
    let recorder = harness.recorder.clone();
    let pipeline = Arc::new(
        load_pipeline(AIR_QUALITY).with_schedule(ScheduleConfig::every_hours(2).unwrap()),
    );

    let engine = Arc::new(harness.engine);
    let scheduler = Scheduler::new(engine);
    scheduler.start_pipeline(pipeline).await.unwrap();

    tokio::time::sleep(Duration::from_secs(4 * HOUR + 60)).await;
    scheduler.shutdown().await;

    let runs = recorder.list_runs(7).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status == RunStatus::Succeeded));
}
