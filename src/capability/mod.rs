//! External capabilities the steps delegate to
//!
//! Each step variant calls exactly one capability. The engine never talks to
//! databases, preprocessing scripts or model libraries directly; it goes
//! through these traits so they can be swapped for subprocess adapters,
//! in-process implementations or test doubles.

pub mod subprocess;

use crate::core::{ConnectionConfig, Metrics, ModelHandle, ModelSpec, Table, TrackingConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub use subprocess::ScriptCapabilities;

/// Errors reported by a capability implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    /// The backing service or program could not be reached
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The capability ran and reported a failure
    #[error("{0}")]
    Failed(String),

    /// The capability answered with something that could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Parameters of a preprocessing call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRequest {
    pub script_path: String,
    pub target_col: Option<String>,
    #[serde(default)]
    pub horizons: Vec<String>,
}

/// Result of a preprocessing call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessed {
    pub data: Table,
    /// Target column name, when the script defines one
    #[serde(default)]
    pub target: Option<String>,
}

/// Result of a training call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub model: ModelHandle,
    #[serde(default)]
    pub metrics: Metrics,
}

/// Model a prediction runs against
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelRef<'a> {
    /// Model trained earlier in the same context
    Handle(&'a ModelHandle),
    /// Model stored in the tracking server
    Uri(&'a str),
}

impl ModelRef<'_> {
    /// Display name for annotations and previews
    pub fn name(&self) -> &str {
        match self {
            ModelRef::Handle(handle) => &handle.name,
            ModelRef::Uri(uri) => uri,
        }
    }
}

/// Reads a dataset from a database
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, connection: &ConnectionConfig, query: &str) -> Result<Table, CapabilityError>;
}

/// Runs an externally maintained preprocessing script
#[async_trait]
pub trait Preprocessor: Send + Sync {
    async fn transform(
        &self,
        data: &Table,
        request: &TransformRequest,
    ) -> Result<Preprocessed, CapabilityError>;
}

/// Fits a model and logs it to the tracking sink
#[async_trait]
pub trait ModelTrainer: Send + Sync {
    async fn fit(
        &self,
        data: &Table,
        target: &str,
        spec: &ModelSpec,
        tracking: &TrackingConfig,
    ) -> Result<TrainedModel, CapabilityError>;
}

/// Produces one prediction per input row
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, model: ModelRef<'_>, data: &Table) -> Result<Vec<Value>, CapabilityError>;
}

/// Writes a table to a database, returning the number of rows written
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(
        &self,
        data: &Table,
        connection: &ConnectionConfig,
        table_name: &str,
    ) -> Result<u64, CapabilityError>;
}

/// The full set of capabilities an engine runs with
#[derive(Clone)]
pub struct Capabilities {
    pub source: Arc<dyn DataSource>,
    pub preprocessor: Arc<dyn Preprocessor>,
    pub trainer: Arc<dyn ModelTrainer>,
    pub predictor: Arc<dyn Predictor>,
    pub sink: Arc<dyn Sink>,
}

impl Capabilities {
    pub fn new(
        source: Arc<dyn DataSource>,
        preprocessor: Arc<dyn Preprocessor>,
        trainer: Arc<dyn ModelTrainer>,
        predictor: Arc<dyn Predictor>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self {
            source,
            preprocessor,
            trainer,
            predictor,
            sink,
        }
    }

    /// Use one provider for all five capabilities
    pub fn from_provider<P>(provider: Arc<P>) -> Self
    where
        P: DataSource + Preprocessor + ModelTrainer + Predictor + Sink + 'static,
    {
        Self {
            source: provider.clone(),
            preprocessor: provider.clone(),
            trainer: provider.clone(),
            predictor: provider.clone(),
            sink: provider,
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}
