//! Test: Success Chain - every step runs in order and its context is cached

use crate::helpers::*;
use mlpipeline::core::{Preview, StepStatus};
use mlpipeline::persistence::{CacheStore, RunRecorder};
use serde_json::json;

/// Extraction, preprocessing and training all succeed and are cached
#[tokio::test]
async fn test_air_quality_chain() {
    let harness = Harness::new(MockCapabilities::new());
    let pipeline = load_pipeline(AIR_QUALITY);

    let run = harness.run(&pipeline).await;

    assert_run_succeeded(&run);
    for order in 0..3 {
        assert_step_status(&run, order, StepStatus::Succeeded);
    }
    assert_eq!(harness.cached_orders(7).await, vec![0, 1, 2]);

    // Training preview reports the model
    match &run.step(2).unwrap().payload {
        Some(Preview::Json { data }) => {
            assert_eq!(data["message"], json!("Model trained successfully."));
            assert_eq!(data["model_name"], json!("RandomForestClassifier"));
            assert_eq!(data["task_type"], json!("classification"));
            assert!(data["metrics"]["accuracy"].is_f64());
        }
        other => panic!("Expected JSON preview, got {:?}", other),
    }

    // Cached context after training carries the target and the model
    let entry = harness.cache.get(7, 2).await.unwrap().unwrap();
    assert_eq!(entry.snapshot.target(), Some("aqi"));
    assert_eq!(
        entry.snapshot.model().map(|m| m.name.as_str()),
        Some("RandomForestClassifier")
    );

    // Re-testing preprocessing reads the cached extraction instead of the source
    let step = pipeline.step(1).unwrap();
    let result = harness.engine.test_step(7, 1, step).await;
    assert!(result.is_ok(), "Step test failed: {:?}", result.error);
    assert_eq!(MockCapabilities::calls(&harness.caps.fetches), 1);
    assert_eq!(MockCapabilities::calls(&harness.caps.transforms), 2);
}

/// A five-step chain predicts with the freshly trained model and saves the result
#[tokio::test]
async fn test_full_chain_saves_predictions() {
    let harness = Harness::new(MockCapabilities::new());
    let pipeline = load_pipeline(FULL_CHAIN);

    let run = harness.run(&pipeline).await;
    assert_run_succeeded(&run);

    // Rows reach the preprocessor sorted by timestamp
    let inputs = harness.caps.transform_inputs.lock().unwrap().clone();
    let timestamps: Vec<_> = inputs[0].rows.iter().map(|r| r[0].clone()).collect();
    assert_eq!(timestamps, vec![json!(1), json!(2), json!(3)]);

    let written = harness.caps.written.lock().unwrap().clone();
    assert_eq!(written.len(), 1);
    assert_eq!(
        written[0].columns,
        vec!["ts", "pm25", "aqi", "prediction", "model_name"]
    );
    assert_eq!(written[0].rows[0][3], json!("LogisticRegression-0"));
    assert_eq!(written[0].rows[0][4], json!("LogisticRegression"));

    assert_eq!(
        run.step(4).unwrap().payload,
        Some(Preview::Text {
            data: "Saved 3 prediction rows to table 'aqi_predictions' in database 'results'."
                .to_string()
        })
    );
}

/// Every status change is recorded, starting from pending
#[tokio::test]
async fn test_step_transitions_recorded() {
    let harness = Harness::new(MockCapabilities::new());
    let pipeline = load_pipeline(AIR_QUALITY);
    let run = harness.run(&pipeline).await;

    let transitions = harness.recorder.step_transitions(run.id).await.unwrap();
    assert_eq!(transitions.len(), 9);

    let first_step: Vec<StepStatus> = transitions
        .iter()
        .filter(|t| t.order == 0)
        .map(|t| t.status)
        .collect();
    assert_eq!(
        first_step,
        vec![StepStatus::Pending, StepStatus::Running, StepStatus::Succeeded]
    );

    let logs: Vec<&str> = run.logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(logs.first(), Some(&"Pipeline 'Air quality' run started"));
    assert_eq!(logs.last(), Some(&"Pipeline 'Air quality' run succeeded"));
}

/// Each run gets its own record; history lists the latest first
#[tokio::test]
async fn test_repeated_runs_listed_latest_first() {
    let harness = Harness::new(MockCapabilities::new());
    let pipeline = load_pipeline(AIR_QUALITY);

    let first = harness.run(&pipeline).await;
    let second = harness.run(&pipeline).await;

    let runs = harness.recorder.list_runs(7).await.unwrap();
    let ids: Vec<_> = runs.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
    assert_eq!(harness.recorder.list_pipelines().await.unwrap(), vec![7]);
}
