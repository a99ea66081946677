//! Test: Failure Handling - a failed step stops the run and skips the rest

use crate::helpers::*;
use mlpipeline::core::{RunStatus, StepStatus};
use mlpipeline::execution::ExecutionEvent;
use mlpipeline::persistence::CacheStore;
use std::sync::{Arc, Mutex};

/// A training failure fails the run; later steps are skipped, earlier ones stay cached
#[tokio::test]
async fn test_training_failure_skips_remaining_steps() {
    let harness = Harness::new(MockCapabilities::failing("fit", "singular matrix"));
    let pipeline = load_pipeline(FULL_CHAIN);

    let run = harness.run(&pipeline).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.finished_at.is_some());
    assert_step_status(&run, 0, StepStatus::Succeeded);
    assert_step_status(&run, 1, StepStatus::Succeeded);
    assert_step_status(&run, 2, StepStatus::Failed);
    assert_step_status(&run, 3, StepStatus::Skipped);
    assert_step_status(&run, 4, StepStatus::Skipped);

    let failed = run.failed_step().expect("Run should have a failed step");
    assert_eq!(failed.order, 2);
    assert_eq!(
        failed.error.as_deref(),
        Some("training error: LogisticRegression: singular matrix")
    );

    assert_eq!(MockCapabilities::calls(&harness.caps.predictions), 0);
    assert_eq!(MockCapabilities::calls(&harness.caps.writes), 0);
    assert_eq!(harness.cached_orders(8).await, vec![0, 1]);
}

/// An unreachable source is reported as a connection error on the first step
#[tokio::test]
async fn test_extraction_failure_is_connection_error() {
    let harness = Harness::new(MockCapabilities::unreachable("fetch", "connection refused"));
    let pipeline = load_pipeline(AIR_QUALITY);

    let run = harness.run(&pipeline).await;

    assert_eq!(run.status, RunStatus::Failed);
    let error = run.step(0).unwrap().error.clone().unwrap_or_default();
    assert!(error.starts_with("connection error:"), "Unexpected error: {}", error);
    assert!(error.contains("'sensors' at db.internal:5432"));
    assert!(error.contains("connection refused"));
    assert!(harness.cached_orders(7).await.is_empty());
}

/// A query the database rejects is a config error, not a connection error
#[tokio::test]
async fn test_rejected_query_is_config_error() {
    let harness = Harness::new(MockCapabilities::failing("fetch", "relation \"readings\" does not exist"));
    let run = harness.run(&load_pipeline(AIR_QUALITY)).await;

    let error = run.step(0).unwrap().error.clone().unwrap_or_default();
    assert!(error.starts_with("config error:"), "Unexpected error: {}", error);
    assert!(error.contains("does not exist"));
}

/// A write the sink rejects fails the save step as a config error
#[tokio::test]
async fn test_rejected_write_is_config_error() {
    let harness = Harness::new(MockCapabilities::failing("write", "permission denied for table"));
    let run = harness.run(&load_pipeline(FULL_CHAIN)).await;

    assert_step_status(&run, 3, StepStatus::Succeeded);
    assert_step_status(&run, 4, StepStatus::Failed);
    let error = run.step(4).unwrap().error.clone().unwrap_or_default();
    assert!(error.starts_with("config error: failed to write 'aqi_predictions'"), "Unexpected error: {}", error);
}

/// A metric JSON cannot hold fails training instead of poisoning the cache
#[tokio::test]
async fn test_non_finite_metric_fails_training() {
    let harness = Harness::new(MockCapabilities::reporting_metric("r2", f64::NAN));
    let pipeline = load_pipeline(FULL_CHAIN);

    let run = harness.run(&pipeline).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_step_status(&run, 2, StepStatus::Failed);
    assert_step_status(&run, 3, StepStatus::Skipped);
    assert_eq!(
        run.step(2).unwrap().error.as_deref(),
        Some("training error: LogisticRegression: metric 'r2' is not a finite number (NaN)")
    );
    assert_eq!(harness.cached_orders(8).await, vec![0, 1]);

    // Every entry left in the cache still decodes
    for order in harness.cached_orders(8).await {
        assert!(harness.cache.get(8, order).await.unwrap().is_some());
    }
}

/// Training on a target the data lacks is a config error, not a trainer call
#[tokio::test]
async fn test_unknown_target_column() {
    let yaml = r#"
id: 9
name: "Wrong target"
steps:
  - name: "Load"
    step_type: extraction
    order: 0
    config:
      database: { type: cratedb, host: "localhost", port: 4200, user: "crate", database: "doc" }
      query: "SELECT * FROM readings"
  - name: "Prepare"
    step_type: preprocessing
    order: 1
    config:
      script_path: "features/air_quality.py"
      target_col: "no2"
  - name: "Train"
    step_type: training
    order: 2
    config:
      model: { name: "RandomForestRegressor", task_type: regression }
"#;
    let harness = Harness::new(MockCapabilities::new());
    let run = harness.run(&load_pipeline(yaml)).await;

    assert_step_status(&run, 2, StepStatus::Failed);
    assert_eq!(
        run.step(2).unwrap().error.as_deref(),
        Some("config error: target column 'no2' not found in data")
    );
    assert_eq!(MockCapabilities::calls(&harness.caps.fits), 0);
}

/// Failure events are emitted in order and the run still finishes
#[tokio::test]
async fn test_failure_events() {
    let harness = Harness::new(MockCapabilities::failing("transform", "KeyError: 'aqi'"));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    harness
        .engine
        .add_event_handler(move |event| sink.lock().unwrap().push(event))
        .await;

    harness.run(&load_pipeline(AIR_QUALITY)).await;

    let events = events.lock().unwrap();
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            ExecutionEvent::RunStarted { .. } => "run_started",
            ExecutionEvent::StepStarted { .. } => "step_started",
            ExecutionEvent::StepSucceeded { .. } => "step_succeeded",
            ExecutionEvent::StepFailed { .. } => "step_failed",
            ExecutionEvent::StepSkipped { .. } => "step_skipped",
            ExecutionEvent::RunFinished { .. } => "run_finished",
            ExecutionEvent::StepTested { .. } => "step_tested",
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "run_started",
            "step_started",
            "step_succeeded",
            "step_started",
            "step_failed",
            "step_skipped",
            "run_finished",
        ]
    );
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunFinished {
            status: RunStatus::Failed,
            ..
        })
    ));
}
