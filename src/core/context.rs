//! Execution context - the typed data bag threaded through a run

use crate::core::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Metric name -> value, as reported by a trainer
pub type Metrics = BTreeMap<String, f64>;

/// Tabular dataset handle (row-major, JSON cells)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// First `n` rows as column-keyed records
    pub fn head_records(&self, n: usize) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .take(n)
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Map<String, Value>>()
            })
            .collect()
    }

    /// Append a column; `values` must have one entry per row
    pub fn push_column(&mut self, name: &str, values: Vec<Value>) -> Result<(), String> {
        if values.len() != self.rows.len() {
            return Err(format!(
                "column '{}' has {} values but the table has {} rows",
                name,
                values.len(),
                self.rows.len()
            ));
        }
        self.columns.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    /// Stable ascending sort on one column
    pub fn sort_by_column(&mut self, index: usize) {
        self.rows.sort_by(|a, b| compare_cells(a.get(index), b.get(index)));
    }
}

/// Nulls first, then numbers, then everything else by its string form
fn compare_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::Number(_)), _) => Ordering::Less,
        (_, Some(Value::Number(_))) => Ordering::Greater,
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Opaque trained-model handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHandle {
    /// Model class name (e.g. "RandomForestClassifier")
    pub name: String,

    /// classification, regression or time_series
    pub task_type: String,

    /// Location of the model in the tracking store, if logged
    #[serde(default)]
    pub uri: Option<String>,

    /// Tracking-run identifier the model was logged under
    #[serde(default)]
    pub tracking_run_id: Option<String>,

    /// Serialized model, owned by the trainer/predictor pair
    #[serde(default)]
    pub blob: Vec<u8>,
}

/// Named slots of the execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Data,
    Target,
    Model,
    Predictions,
    Metrics,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Slot::Data => "data",
            Slot::Target => "target",
            Slot::Model => "model",
            Slot::Predictions => "predictions",
            Slot::Metrics => "metrics",
        };
        f.write_str(name)
    }
}

/// Execution context for a pipeline run
///
/// Each slot is replaced wholesale by the step that owns it and read by the
/// steps after it. Steps never hold a mutable reference: they return a
/// [`StepOutput`] which the engine applies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    data: Option<Table>,
    target: Option<String>,
    model: Option<ModelHandle>,
    predictions: Option<Table>,
    metrics: Option<Metrics>,
}

impl ExecutionContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&self) -> Option<&Table> {
        self.data.as_ref()
    }

    pub fn set_data(&mut self, data: Table) {
        self.data = Some(data);
    }

    /// Training target column, defined by preprocessing
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn set_target(&mut self, target: String) {
        self.target = Some(target);
    }

    pub fn model(&self) -> Option<&ModelHandle> {
        self.model.as_ref()
    }

    pub fn set_model(&mut self, model: ModelHandle) {
        self.model = Some(model);
    }

    pub fn predictions(&self) -> Option<&Table> {
        self.predictions.as_ref()
    }

    pub fn set_predictions(&mut self, predictions: Table) {
        self.predictions = Some(predictions);
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    pub fn set_metrics(&mut self, metrics: Metrics) {
        self.metrics = Some(metrics);
    }

    /// Check whether a slot currently holds a value
    pub fn has(&self, slot: Slot) -> bool {
        match slot {
            Slot::Data => self.data.is_some(),
            Slot::Target => self.target.is_some(),
            Slot::Model => self.model.is_some(),
            Slot::Predictions => self.predictions.is_some(),
            Slot::Metrics => self.metrics.is_some(),
        }
    }

    /// Slots from `required` that are empty
    pub fn missing(&self, required: &[Slot]) -> Vec<Slot> {
        required.iter().copied().filter(|s| !self.has(*s)).collect()
    }

    /// Slots that currently hold a value
    pub fn filled(&self) -> Vec<Slot> {
        [Slot::Data, Slot::Target, Slot::Model, Slot::Predictions, Slot::Metrics]
            .into_iter()
            .filter(|s| self.has(*s))
            .collect()
    }

    /// Apply a step's output, rejecting writes outside `allowed`
    pub fn apply(&mut self, output: StepOutput, allowed: &[Slot]) -> Result<(), EngineError> {
        let undeclared: Vec<String> = output
            .written()
            .into_iter()
            .filter(|s| !allowed.contains(s))
            .map(|s| s.to_string())
            .collect();
        if !undeclared.is_empty() {
            return Err(EngineError::Config(format!(
                "step wrote undeclared context slot(s): {}",
                undeclared.join(", ")
            )));
        }

        if let Some(data) = output.data {
            self.set_data(data);
        }
        if let Some(target) = output.target {
            self.set_target(target);
        }
        if let Some(model) = output.model {
            self.set_model(model);
        }
        if let Some(predictions) = output.predictions {
            self.set_predictions(predictions);
        }
        if let Some(metrics) = output.metrics {
            self.set_metrics(metrics);
        }
        Ok(())
    }
}

/// Slots written by a single step
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    pub data: Option<Table>,
    pub target: Option<String>,
    pub model: Option<ModelHandle>,
    pub predictions: Option<Table>,
    pub metrics: Option<Metrics>,
}

impl StepOutput {
    /// Output of a step that writes nothing
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn written(&self) -> Vec<Slot> {
        let mut slots = Vec::new();
        if self.data.is_some() {
            slots.push(Slot::Data);
        }
        if self.target.is_some() {
            slots.push(Slot::Target);
        }
        if self.model.is_some() {
            slots.push(Slot::Model);
        }
        if self.predictions.is_some() {
            slots.push(Slot::Predictions);
        }
        if self.metrics.is_some() {
            slots.push(Slot::Metrics);
        }
        slots
    }
}
