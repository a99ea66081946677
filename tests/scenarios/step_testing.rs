//! Test: Step Testing - single steps against the cached context

use crate::helpers::*;
use mlpipeline::core::{ErrorKind, Pipeline, PipelineStep, Preview, StepKind};
use mlpipeline::persistence::CacheStore;
use std::time::Duration;

/// Testing a step whose predecessor was never cached fails with a cache error
#[tokio::test]
async fn test_step_without_cached_predecessor() {
    let harness = Harness::new(MockCapabilities::new());
    let pipeline = load_pipeline(AIR_QUALITY);

    let result = harness
        .engine
        .test_step(7, 1, pipeline.step(1).unwrap())
        .await;

    assert!(!result.is_ok());
    assert!(result.preview.is_none());
    assert_eq!(result.error_kind, Some(ErrorKind::Cache));
    assert!(result
        .error
        .unwrap()
        .contains("no cached context for pipeline 7 step 0"));
    assert_eq!(MockCapabilities::calls(&harness.caps.transforms), 0);
}

/// The first step runs from an empty context and seeds the cache
#[tokio::test]
async fn test_first_step_seeds_cache() {
    let harness = Harness::new(MockCapabilities::new());
    let pipeline = load_pipeline(AIR_QUALITY);

    let result = harness
        .engine
        .test_step(7, 0, pipeline.step(0).unwrap())
        .await;

    match result.preview {
        Some(Preview::Table { rows, ref columns, ref data }) => {
            assert_eq!(rows, 3);
            assert_eq!(columns, &vec!["ts", "pm25", "aqi"]);
            assert_eq!(data.len(), 3);
        }
        ref other => panic!("Expected table preview, got {:?}", other),
    }
    assert_eq!(harness.cached_orders(7).await, vec![0]);

    // The next step can now be tested on its own
    let next = harness
        .engine
        .test_step(7, 1, pipeline.step(1).unwrap())
        .await;
    assert!(next.is_ok(), "Step test failed: {:?}", next.error);
    assert_eq!(harness.cached_orders(7).await, vec![0, 1]);
}

/// A step whose inputs were never produced upstream fails with a config error
#[tokio::test]
async fn test_missing_slot_is_config_error() {
    let air = load_pipeline(AIR_QUALITY);
    let extract = air.step(0).unwrap().clone();
    let mut train = air.step(2).unwrap().clone();
    train.order = 1;
    let pipeline = Pipeline::new(20, "No preprocessing", vec![extract, train]);

    let harness = Harness::new(MockCapabilities::new());
    harness
        .engine
        .test_step(20, 0, pipeline.step(0).unwrap())
        .await;
    let result = harness
        .engine
        .test_step(20, 1, pipeline.step(1).unwrap())
        .await;

    assert_eq!(result.error_kind, Some(ErrorKind::Config));
    assert!(result
        .error
        .unwrap()
        .contains("missing required context slot(s): target"));
    assert_eq!(MockCapabilities::calls(&harness.caps.fits), 0);
    assert_eq!(harness.cached_orders(20).await, vec![0]);
}

/// Re-testing an unchanged step rewrites the same bytes and keeps downstream entries
#[tokio::test]
async fn test_retest_is_idempotent() {
    let harness = Harness::new(MockCapabilities::new());
    let pipeline = load_pipeline(AIR_QUALITY);
    harness.run(&pipeline).await;

    let before = harness.cache.raw(7, 1).await.unwrap();
    let first = harness
        .engine
        .test_step(7, 1, pipeline.step(1).unwrap())
        .await;
    let second = harness
        .engine
        .test_step(7, 1, pipeline.step(1).unwrap())
        .await;
    let after = harness.cache.raw(7, 1).await.unwrap();

    assert_eq!(before, after);
    assert_eq!(first.preview, second.preview);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(harness.cached_orders(7).await, vec![0, 1, 2]);
}

/// Changing a step's config drops every cached entry after it
#[tokio::test]
async fn test_config_change_invalidates_downstream() {
    let harness = Harness::new(MockCapabilities::new());
    let pipeline = load_pipeline(AIR_QUALITY);
    harness.run(&pipeline).await;

    let mut edited_step: PipelineStep = pipeline.step(1).unwrap().clone();
    if let StepKind::Preprocessing(config) = &mut edited_step.kind {
        config.script_path = "features/air_quality_v2.py".to_string();
    }
    let result = harness.engine.test_step(7, 1, &edited_step).await;
    assert!(result.is_ok(), "Step test failed: {:?}", result.error);

    assert_eq!(harness.cached_orders(7).await, vec![0, 1]);
    let entry = harness.cache.get(7, 1).await.unwrap().unwrap();
    assert_eq!(entry.fingerprint, result.fingerprint.unwrap());

    let mut edited = pipeline.clone();
    edited.steps[1] = edited_step;
    assert!(harness.engine.stale_entries(&edited).await.unwrap().is_empty());
    assert_eq!(harness.engine.stale_entries(&pipeline).await.unwrap(), vec![1]);
}

/// A corrupt cache entry is reported, not silently rebuilt
#[tokio::test]
async fn test_corrupt_cache_entry() {
    let harness = Harness::new(MockCapabilities::new());
    let pipeline = load_pipeline(AIR_QUALITY);
    harness.cache.insert_raw(7, 0, b"{ not json".to_vec()).await;

    let result = harness
        .engine
        .test_step(7, 1, pipeline.step(1).unwrap())
        .await;

    assert_eq!(result.error_kind, Some(ErrorKind::Cache));
    assert_eq!(MockCapabilities::calls(&harness.caps.fetches), 0);
}

/// A run and a step test of the same pipeline take turns; the cache chain stays intact
#[tokio::test(start_paused = true)]
async fn test_run_and_step_test_serialized_per_pipeline() {
    let harness = Harness::new(MockCapabilities::slow_fetch(Duration::from_secs(5)));
    let pipeline = load_pipeline(AIR_QUALITY);

    let (run, tested) = tokio::join!(
        harness.run(&pipeline),
        harness.engine.test_step(7, 0, pipeline.step(0).unwrap())
    );

    assert_run_succeeded(&run);
    assert!(tested.is_ok(), "Step test failed: {:?}", tested.error);
    assert_eq!(MockCapabilities::calls(&harness.caps.fetches), 2);
    assert_eq!(MockCapabilities::calls(&harness.caps.max_fetches_in_flight), 1);

    assert_eq!(harness.cached_orders(7).await, vec![0, 1, 2]);
    let first = harness.cache.get(7, 0).await.unwrap().unwrap();
    let second = harness.cache.get(7, 1).await.unwrap().unwrap();
    assert_eq!(second.parent_fingerprint, Some(first.fingerprint));
}

/// Different pipelines are not serialized against each other
#[tokio::test(start_paused = true)]
async fn test_different_pipelines_run_concurrently() {
    let harness = Harness::new(MockCapabilities::slow_fetch(Duration::from_secs(5)));
    let pipeline = load_pipeline(AIR_QUALITY);
    let mut other = pipeline.clone();
    other.id = 70;

    let (a, b) = tokio::join!(harness.run(&pipeline), harness.run(&other));

    assert_run_succeeded(&a);
    assert_run_succeeded(&b);
    assert_eq!(MockCapabilities::calls(&harness.caps.max_fetches_in_flight), 2);
}
