//! Test: SQLite History - runs written by the engine survive a reopen

use crate::helpers::*;
use mlpipeline::capability::Capabilities;
use mlpipeline::core::{RunStatus, StepStatus};
use mlpipeline::execution::PipelineEngine;
use mlpipeline::persistence::{FsCacheStore, RunRecorder, SqliteRunRecorder};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_failed_run_persisted() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("history").join("runs.db");
    let pipeline = load_pipeline(FULL_CHAIN);

    let run_id = {
        let recorder = Arc::new(SqliteRunRecorder::open(&db_path).await.unwrap());
        let engine = PipelineEngine::new(
            Capabilities::from_provider(MockCapabilities::failing("predict", "model not found")),
            Arc::new(FsCacheStore::new(dir.path().join("cache"))),
            recorder,
        );
        engine.run(&pipeline).await.unwrap()
    };

    let recorder = SqliteRunRecorder::open(&db_path).await.unwrap();
    let run = recorder.load_run(run_id).await.unwrap().unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.finished_at.is_some());
    assert_step_status(&run, 2, StepStatus::Succeeded);
    assert_step_status(&run, 3, StepStatus::Failed);
    assert_step_status(&run, 4, StepStatus::Skipped);
    assert!(run
        .step(3)
        .unwrap()
        .error
        .as_deref()
        .unwrap_or_default()
        .starts_with("prediction error: LogisticRegression"));
    assert!(run.step(2).unwrap().payload.is_some());

    // 5 pending, 3 x (running, succeeded), running + failed, skipped
    assert_eq!(recorder.step_transitions(run_id).await.unwrap().len(), 14);
    assert_eq!(recorder.list_pipelines().await.unwrap(), vec![8]);
    assert!(!run.logs.is_empty());

    // Cached contexts land on disk, one file per completed step
    let mut files: Vec<String> = std::fs::read_dir(dir.path().join("cache"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(
        files,
        vec![
            "pipeline_8_step_0.json",
            "pipeline_8_step_1.json",
            "pipeline_8_step_2.json",
        ]
    );
}
