//! Step domain model

use crate::core::{context::Slot, error::EngineError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// The five step variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Extraction,
    Preprocessing,
    Training,
    Prediction,
    Save,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Extraction => "extraction",
            StepType::Preprocessing => "preprocessing",
            StepType::Training => "training",
            StepType::Prediction => "prediction",
            StepType::Save => "save",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database driver kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Mysql,
    Postgres,
    Cratedb,
    Mongodb,
}

/// Connection parameters handed to a data source or sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    #[serde(rename = "type")]
    pub driver: Driver,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionConfig {
    pub database: ConnectionConfig,
    pub query: String,
}

/// Time-series options for preprocessing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForecastingConfig {
    /// Rows are sorted ascending on this column before the script runs
    #[serde(default)]
    pub timestamp_col: Option<String>,

    #[serde(default)]
    pub horizons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreprocessingConfig {
    /// Path of the externally maintained preprocessing script
    pub script_path: String,

    /// Target column; when set the step defines the training target
    #[serde(default)]
    pub target_col: Option<String>,

    #[serde(default)]
    pub forecasting: Option<ForecastingConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Classification,
    Regression,
    TimeSeries,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Classification => "classification",
            TaskType::Regression => "regression",
            TaskType::TimeSeries => "time_series",
        }
    }
}

/// Model name, task type and hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

/// Experiment-tracking sink reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackingConfig {
    #[serde(default = "default_tracking_uri")]
    pub tracking_uri: String,
    #[serde(default = "default_experiment_name")]
    pub experiment_name: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tracking_uri: default_tracking_uri(),
            experiment_name: default_experiment_name(),
        }
    }
}

fn default_tracking_uri() -> String {
    "http://localhost:5000".to_string()
}

fn default_experiment_name() -> String {
    "Default".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingConfig {
    pub model: ModelSpec,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PredictionConfig {
    /// Used when no model is present in the incoming context
    #[serde(default)]
    pub model_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaveConfig {
    pub database: ConnectionConfig,
    pub table_name: String,
}

/// A step variant together with its validated configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step_type", content = "config", rename_all = "lowercase")]
pub enum StepKind {
    Extraction(ExtractionConfig),
    Preprocessing(PreprocessingConfig),
    Training(TrainingConfig),
    Prediction(PredictionConfig),
    Save(SaveConfig),
}

impl StepKind {
    /// Parse an untyped config for the given variant
    pub fn from_config(step_type: StepType, config: Value) -> Result<Self, EngineError> {
        let config = match config {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        let parsed = match step_type {
            StepType::Extraction => serde_json::from_value(config).map(StepKind::Extraction),
            StepType::Preprocessing => serde_json::from_value(config).map(StepKind::Preprocessing),
            StepType::Training => serde_json::from_value(config).map(StepKind::Training),
            StepType::Prediction => serde_json::from_value(config).map(StepKind::Prediction),
            StepType::Save => serde_json::from_value(config).map(StepKind::Save),
        }
        .map_err(|e| EngineError::Config(format!("invalid {} config: {}", step_type, e)))?;

        parsed.validate()?;
        Ok(parsed)
    }

    pub fn step_type(&self) -> StepType {
        match self {
            StepKind::Extraction(_) => StepType::Extraction,
            StepKind::Preprocessing(_) => StepType::Preprocessing,
            StepKind::Training(_) => StepType::Training,
            StepKind::Prediction(_) => StepType::Prediction,
            StepKind::Save(_) => StepType::Save,
        }
    }

    /// Config serialized back to JSON (used for fingerprinting)
    pub fn config_json(&self) -> Value {
        let result = match self {
            StepKind::Extraction(c) => serde_json::to_value(c),
            StepKind::Preprocessing(c) => serde_json::to_value(c),
            StepKind::Training(c) => serde_json::to_value(c),
            StepKind::Prediction(c) => serde_json::to_value(c),
            StepKind::Save(c) => serde_json::to_value(c),
        };
        result.unwrap_or(Value::Null)
    }

    /// Field checks serde cannot express
    fn validate(&self) -> Result<(), EngineError> {
        let blank = |field: &str, value: &str| {
            if value.trim().is_empty() {
                Err(EngineError::Config(format!(
                    "{} config field '{}' must not be empty",
                    self.step_type(),
                    field
                )))
            } else {
                Ok(())
            }
        };

        match self {
            StepKind::Extraction(c) => {
                blank("database.host", &c.database.host)?;
                blank("query", &c.query)
            }
            StepKind::Preprocessing(c) => {
                blank("script_path", &c.script_path)?;
                if let Some(target) = &c.target_col {
                    blank("target_col", target)?;
                }
                Ok(())
            }
            StepKind::Training(c) => blank("model.name", &c.model.name),
            StepKind::Prediction(c) => match &c.model_uri {
                Some(uri) => blank("model_uri", uri),
                None => Ok(()),
            },
            StepKind::Save(c) => {
                blank("database.host", &c.database.host)?;
                blank("table_name", &c.table_name)
            }
        }
    }
}

/// Slots each variant needs on entry
pub fn required_slots(step_type: StepType) -> &'static [Slot] {
    match step_type {
        StepType::Extraction => &[],
        StepType::Preprocessing => &[Slot::Data],
        StepType::Training => &[Slot::Data, Slot::Target],
        StepType::Prediction => &[Slot::Data],
        StepType::Save => &[Slot::Predictions],
    }
}

/// Slots each variant may write
pub fn produced_slots(step_type: StepType) -> &'static [Slot] {
    match step_type {
        StepType::Extraction => &[Slot::Data],
        StepType::Preprocessing => &[Slot::Data, Slot::Target],
        StepType::Training => &[Slot::Model, Slot::Metrics],
        StepType::Prediction => &[Slot::Predictions],
        StepType::Save => &[],
    }
}

/// A single step in a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Unique step identifier
    pub id: String,

    /// Human-readable step name
    pub name: String,

    /// Position in the pipeline, starting at 0
    pub order: u32,

    /// Variant and typed config
    #[serde(flatten)]
    pub kind: StepKind,
}

impl PipelineStep {
    pub fn new(name: impl Into<String>, order: u32, kind: StepKind) -> Self {
        let id = format!("{}-{}", kind.step_type(), order);
        Self {
            id,
            name: name.into(),
            order,
            kind,
        }
    }

    /// Build a step from an untyped definition (e.g. a UI payload)
    pub fn from_definition(
        name: impl Into<String>,
        order: u32,
        step_type: StepType,
        config: Value,
    ) -> Result<Self, EngineError> {
        let name = name.into();
        let kind = StepKind::from_config(step_type, config)
            .map_err(|e| scoped_config_error(&name, order, e))?;
        Ok(Self::new(name, order, kind))
    }

    pub fn step_type(&self) -> StepType {
        self.kind.step_type()
    }

    /// Label used in logs and step-scoped error messages
    pub fn label(&self) -> String {
        format!("step {} '{}' ({})", self.order, self.name, self.step_type())
    }
}

fn scoped_config_error(name: &str, order: u32, err: EngineError) -> EngineError {
    match err {
        EngineError::Config(msg) => EngineError::Config(format!("step {} '{}': {}", order, name, msg)),
        other => other,
    }
}
