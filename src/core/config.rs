//! Pipeline and engine configuration from YAML

use crate::core::{
    error::EngineError,
    pipeline::Pipeline,
    schedule::{ScheduleConfig, UtcOffset},
    state::PipelineId,
    step::{PipelineStep, StepType},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level pipeline definition loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline identifier
    pub id: PipelineId,

    /// Pipeline name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Pipeline steps
    pub steps: Vec<StepConfig>,

    /// Optional time-based trigger
    #[serde(default)]
    pub schedule: Option<ScheduleSpec>,
}

/// Step definition as written in YAML
///
/// `config` stays untyped here; it is parsed into the variant's typed config
/// when the pipeline is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Human-readable step name
    pub name: String,

    pub step_type: StepType,

    /// Position in the pipeline, starting at 0
    pub order: u32,

    #[serde(default)]
    pub config: serde_json::Value,
}

/// Schedule as written in YAML: either `time` (with optional `utc_offset`) or `interval_hours`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleSpec {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Daily fire time "HH:MM" in the display timezone
    #[serde(default)]
    pub time: Option<String>,

    /// Display timezone offset, e.g. "+05:30"; UTC when omitted
    #[serde(default)]
    pub utc_offset: Option<String>,

    #[serde(default)]
    pub interval_hours: Option<i64>,
}

fn default_enabled() -> bool {
    true
}

impl ScheduleSpec {
    /// Resolve to a canonical schedule
    pub fn resolve(&self) -> Result<ScheduleConfig, EngineError> {
        let schedule = match (&self.time, self.interval_hours) {
            (Some(_), Some(_)) => {
                return Err(EngineError::ScheduleConflict(
                    "schedule sets both 'time' and 'interval_hours'".to_string(),
                ))
            }
            (None, None) => {
                return Err(EngineError::ScheduleConflict(
                    "schedule needs either 'time' or 'interval_hours'".to_string(),
                ))
            }
            (Some(time), None) => {
                let offset = match &self.utc_offset {
                    Some(raw) => UtcOffset::parse(raw)?,
                    None => UtcOffset::UTC,
                };
                ScheduleConfig::daily(time, offset)?
            }
            (None, Some(hours)) => {
                if self.utc_offset.is_some() {
                    return Err(EngineError::ScheduleConflict(
                        "'utc_offset' only applies to a daily 'time'".to_string(),
                    ));
                }
                ScheduleConfig::every_hours(hours)?
            }
        };

        Ok(if self.enabled {
            schedule
        } else {
            schedule.disabled()
        })
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate by building the typed pipeline
    pub fn validate(&self) -> Result<(), EngineError> {
        self.to_pipeline().map(|_| ())
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline, EngineError> {
        let steps = self
            .steps
            .iter()
            .map(|s| PipelineStep::from_definition(&s.name, s.order, s.step_type, s.config.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut pipeline = Pipeline::new(self.id, &self.name, steps);
        pipeline.description = self.description.clone();
        if let Some(spec) = &self.schedule {
            pipeline.schedule = Some(spec.resolve()?);
        }

        pipeline.validate()?;
        Ok(pipeline)
    }
}

/// Engine-wide settings for the `mlpipeline` binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    /// Directory holding cached step artifacts
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// SQLite run history; defaults to the platform data directory
    #[serde(default)]
    pub history_db: Option<PathBuf>,

    /// Command implementing the step capabilities
    #[serde(default = "default_script_program")]
    pub script_program: String,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_script_program() -> String {
    "mlpipeline-capability".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            history_db: None,
            script_program: default_script_program(),
        }
    }
}

impl EngineSettings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid settings file {}", path.display()))
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Resolved run-history database path
    pub fn history_db_path(&self) -> PathBuf {
        match &self.history_db {
            Some(path) => path.clone(),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mlpipeline")
                .join("runs.db"),
        }
    }
}
