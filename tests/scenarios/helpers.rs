//! Test utilities for mlpipeline scenarios

use async_trait::async_trait;
use mlpipeline::capability::{
    Capabilities, CapabilityError, DataSource, ModelRef, ModelTrainer, Predictor, Preprocessed,
    Preprocessor, Sink, TrainedModel, TransformRequest,
};
use mlpipeline::core::config::PipelineConfig;
use mlpipeline::core::{
    ConnectionConfig, ModelHandle, ModelSpec, Pipeline, PipelineRun, RunStatus, StepStatus, Table,
    TrackingConfig,
};
use mlpipeline::execution::PipelineEngine;
use mlpipeline::persistence::{CacheStore, InMemoryCacheStore, InMemoryRunRecorder, RunRecorder};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Air-quality pipeline: extraction, preprocessing and training
pub const AIR_QUALITY: &str = r#"
id: 7
name: "Air quality"
description: "Classify air quality from sensor readings"
steps:
  - name: "Load readings"
    step_type: extraction
    order: 0
    config:
      database:
        type: postgres
        host: "db.internal"
        port: 5432
        user: "ml"
        password: "secret"
        database: "sensors"
      query: "SELECT * FROM readings"
  - name: "Clean readings"
    step_type: preprocessing
    order: 1
    config:
      script_path: "features/air_quality.py"
      target_col: "aqi"
  - name: "Train forest"
    step_type: training
    order: 2
    config:
      model:
        name: "RandomForestClassifier"
        task_type: classification
        params:
          n_estimators: 100
      tracking:
        tracking_uri: "http://mlflow:5000"
        experiment_name: "air-quality"
"#;

/// Five-step pipeline ending in a save
pub const FULL_CHAIN: &str = r#"
id: 8
name: "Predict and store"
steps:
  - name: "Load"
    step_type: extraction
    order: 0
    config:
      database: { type: mysql, host: "localhost", port: 3306, user: "ml", database: "sensors" }
      query: "SELECT * FROM readings"
  - name: "Prepare"
    step_type: preprocessing
    order: 1
    config:
      script_path: "features/air_quality.py"
      target_col: "aqi"
      forecasting:
        timestamp_col: "ts"
  - name: "Train"
    step_type: training
    order: 2
    config:
      model: { name: "LogisticRegression" }
  - name: "Predict"
    step_type: prediction
    order: 3
  - name: "Store"
    step_type: save
    order: 4
    config:
      database: { type: mysql, host: "localhost", port: 3306, user: "ml", database: "results" }
      table_name: "aqi_predictions"
"#;

pub fn load_pipeline(yaml: &str) -> Pipeline {
    PipelineConfig::from_yaml(yaml)
        .expect("Should parse YAML")
        .to_pipeline()
        .expect("Should build pipeline")
}

/// In-process capabilities returning canned data and counting calls
#[derive(Default)]
pub struct MockCapabilities {
    pub fetches: AtomicUsize,
    pub transforms: AtomicUsize,
    pub fits: AtomicUsize,
    pub predictions: AtomicUsize,
    pub writes: AtomicUsize,

    /// Fail the named capability with this error
    pub fail: Mutex<Option<(&'static str, CapabilityError)>>,

    /// How long each fetch takes
    pub fetch_delay: Option<Duration>,

    /// Fetches currently running, and the most ever seen at once
    pub fetches_in_flight: AtomicUsize,
    pub max_fetches_in_flight: AtomicUsize,

    /// Extra metrics reported by every fit
    pub extra_metrics: Mutex<Vec<(String, f64)>>,

    /// Tables handed to the preprocessor, in call order
    pub transform_inputs: Mutex<Vec<Table>>,

    /// Rows received by the sink
    pub written: Mutex<Vec<Table>>,
}

impl MockCapabilities {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(capability: &'static str, message: &str) -> Arc<Self> {
        Self::with_error(capability, CapabilityError::Failed(message.to_string()))
    }

    pub fn unreachable(capability: &'static str, message: &str) -> Arc<Self> {
        Self::with_error(capability, CapabilityError::Unreachable(message.to_string()))
    }

    fn with_error(capability: &'static str, error: CapabilityError) -> Arc<Self> {
        let mock = Self::default();
        *mock.fail.lock().unwrap() = Some((capability, error));
        Arc::new(mock)
    }

    pub fn slow_fetch(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fetch_delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn reporting_metric(name: &str, value: f64) -> Arc<Self> {
        let mock = Self::default();
        mock.extra_metrics.lock().unwrap().push((name.to_string(), value));
        Arc::new(mock)
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn check(&self, capability: &'static str) -> Result<(), CapabilityError> {
        match &*self.fail.lock().unwrap() {
            Some((name, error)) if *name == capability => Err(error.clone()),
            _ => Ok(()),
        }
    }
}

/// Sensor readings, deliberately out of timestamp order
pub fn readings() -> Table {
    Table::new(
        vec!["ts".to_string(), "pm25".to_string(), "aqi".to_string()],
        vec![
            vec![json!(3), json!(40.5), json!("moderate")],
            vec![json!(1), json!(12.0), json!("good")],
            vec![json!(2), json!(80.1), json!("unhealthy")],
        ],
    )
}

#[async_trait]
impl DataSource for MockCapabilities {
    async fn fetch(&self, _connection: &ConnectionConfig, _query: &str) -> Result<Table, CapabilityError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let running = self.fetches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_fetches_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.fetches_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.check("fetch")?;
        Ok(readings())
    }
}

#[async_trait]
impl Preprocessor for MockCapabilities {
    async fn transform(&self, data: &Table, request: &TransformRequest) -> Result<Preprocessed, CapabilityError> {
        self.transforms.fetch_add(1, Ordering::SeqCst);
        self.transform_inputs.lock().unwrap().push(data.clone());
        self.check("transform")?;
        Ok(Preprocessed {
            data: data.clone(),
            target: request.target_col.clone(),
        })
    }
}

#[async_trait]
impl ModelTrainer for MockCapabilities {
    async fn fit(
        &self,
        data: &Table,
        target: &str,
        spec: &ModelSpec,
        _tracking: &TrackingConfig,
    ) -> Result<TrainedModel, CapabilityError> {
        self.fits.fetch_add(1, Ordering::SeqCst);
        self.check("fit")?;
        Ok(TrainedModel {
            model: ModelHandle {
                name: spec.name.clone(),
                task_type: spec.task_type.as_str().to_string(),
                uri: Some(format!("runs:/abc123/{}", spec.name)),
                tracking_run_id: Some("abc123".to_string()),
                blob: target.as_bytes().to_vec(),
            },
            metrics: [("accuracy".to_string(), 0.5 + data.len() as f64 / 10.0)]
                .into_iter()
                .chain(self.extra_metrics.lock().unwrap().iter().cloned())
                .collect(),
        })
    }
}

#[async_trait]
impl Predictor for MockCapabilities {
    async fn predict(&self, model: ModelRef<'_>, data: &Table) -> Result<Vec<Value>, CapabilityError> {
        self.predictions.fetch_add(1, Ordering::SeqCst);
        self.check("predict")?;
        Ok((0..data.len()).map(|i| json!(format!("{}-{}", model.name(), i))).collect())
    }
}

#[async_trait]
impl Sink for MockCapabilities {
    async fn write(&self, data: &Table, _connection: &ConnectionConfig, _table_name: &str) -> Result<u64, CapabilityError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check("write")?;
        self.written.lock().unwrap().push(data.clone());
        Ok(data.len() as u64)
    }
}

/// Engine over in-memory backends, sharing them with the test
pub struct Harness {
    pub engine: PipelineEngine,
    pub caps: Arc<MockCapabilities>,
    pub cache: Arc<InMemoryCacheStore>,
    pub recorder: Arc<InMemoryRunRecorder>,
}

impl Harness {
    pub fn new(caps: Arc<MockCapabilities>) -> Self {
        let cache = Arc::new(InMemoryCacheStore::new());
        let recorder = Arc::new(InMemoryRunRecorder::new());
        let engine = PipelineEngine::new(
            Capabilities::from_provider(caps.clone()),
            cache.clone(),
            recorder.clone(),
        );
        Self {
            engine,
            caps,
            cache,
            recorder,
        }
    }

    pub async fn run(&self, pipeline: &Pipeline) -> PipelineRun {
        let run_id = self.engine.run(pipeline).await.expect("Run should be recorded");
        self.recorder
            .load_run(run_id)
            .await
            .unwrap()
            .expect("Run should exist")
    }

    pub async fn cached_orders(&self, pipeline_id: i64) -> Vec<u32> {
        self.cache.orders(pipeline_id).await.unwrap()
    }
}

// Assert helpers

pub fn assert_run_succeeded(run: &PipelineRun) {
    assert_eq!(
        run.status,
        RunStatus::Succeeded,
        "Expected run to succeed, steps: {:?}",
        run.steps
    );
    assert!(run.finished_at.is_some());
}

pub fn assert_step_status(run: &PipelineRun, order: u32, expected: StepStatus) {
    let step = run
        .step(order)
        .unwrap_or_else(|| panic!("Run has no step {}", order));
    assert_eq!(
        step.status, expected,
        "Step {} expected {:?}, got {:?} ({:?})",
        order, expected, step.status, step.error
    );
}
