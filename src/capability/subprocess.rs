//! Capabilities backed by an external program
//!
//! Every call spawns `<program> [args..] <capability>`, writes one JSON
//! request to stdin and reads one JSON response from stdout. Exit code 69
//! (EX_UNAVAILABLE) signals that the backing service was unreachable; any
//! other non-zero exit is a capability failure carrying stderr.

use crate::capability::{
    CapabilityError, DataSource, ModelRef, ModelTrainer, Preprocessed, Predictor, Preprocessor,
    Sink, TrainedModel, TransformRequest,
};
use crate::core::{ConnectionConfig, ModelSpec, Table, TrackingConfig};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const EXIT_UNAVAILABLE: i32 = 69;

/// Subprocess adapter implementing all five capabilities
#[derive(Debug, Clone)]
pub struct ScriptCapabilities {
    /// Program to spawn
    program: String,

    /// Arguments placed before the capability name
    args: Vec<String>,
}

impl ScriptCapabilities {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Run one capability call and decode its response
    async fn invoke<R: DeserializeOwned>(
        &self,
        capability: &str,
        request: Value,
    ) -> Result<R, CapabilityError> {
        let payload = serde_json::to_vec(&request)
            .map_err(|e| CapabilityError::Failed(format!("Failed to encode request: {}", e)))?;

        debug!(
            "Spawning {} {} with {} byte request",
            self.program,
            capability,
            payload.len()
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(capability)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CapabilityError::Unreachable(format!("Failed to spawn {}: {}", self.program, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&payload).await {
                // The program may exit without reading its request
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(CapabilityError::Failed(format!(
                        "Failed to write request to {}: {}",
                        self.program, e
                    )));
                }
            }
        }

        let output = child.wait_with_output().await.map_err(|e| {
            CapabilityError::Failed(format!("Failed to wait for {}: {}", self.program, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(
                "{} {} exited with code {}: {}",
                self.program,
                capability,
                exit_code,
                stderr.trim()
            );
            let message = format!("{} exited with code {}: {}", capability, exit_code, stderr.trim());
            return Err(if exit_code == EXIT_UNAVAILABLE {
                CapabilityError::Unreachable(message)
            } else {
                CapabilityError::Failed(message)
            });
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| CapabilityError::InvalidResponse(format!("{} response: {}", capability, e)))
    }
}

#[derive(Deserialize)]
struct PredictResponse {
    predictions: Vec<Value>,
}

#[derive(Deserialize)]
struct WriteResponse {
    rows_written: u64,
}

#[async_trait]
impl DataSource for ScriptCapabilities {
    async fn fetch(&self, connection: &ConnectionConfig, query: &str) -> Result<Table, CapabilityError> {
        self.invoke("fetch", json!({ "database": connection, "query": query }))
            .await
    }
}

#[async_trait]
impl Preprocessor for ScriptCapabilities {
    async fn transform(
        &self,
        data: &Table,
        request: &TransformRequest,
    ) -> Result<Preprocessed, CapabilityError> {
        self.invoke("transform", json!({ "data": data, "request": request }))
            .await
    }
}

#[async_trait]
impl ModelTrainer for ScriptCapabilities {
    async fn fit(
        &self,
        data: &Table,
        target: &str,
        spec: &ModelSpec,
        tracking: &TrackingConfig,
    ) -> Result<TrainedModel, CapabilityError> {
        self.invoke(
            "fit",
            json!({ "data": data, "target": target, "model": spec, "tracking": tracking }),
        )
        .await
    }
}

#[async_trait]
impl Predictor for ScriptCapabilities {
    async fn predict(&self, model: ModelRef<'_>, data: &Table) -> Result<Vec<Value>, CapabilityError> {
        let model = match model {
            ModelRef::Handle(handle) => json!({ "handle": handle }),
            ModelRef::Uri(uri) => json!({ "uri": uri }),
        };
        let response: PredictResponse = self
            .invoke("predict", json!({ "model": model, "data": data }))
            .await?;
        Ok(response.predictions)
    }
}

#[async_trait]
impl Sink for ScriptCapabilities {
    async fn write(
        &self,
        data: &Table,
        connection: &ConnectionConfig,
        table_name: &str,
    ) -> Result<u64, CapabilityError> {
        let response: WriteResponse = self
            .invoke(
                "write",
                json!({ "data": data, "database": connection, "table_name": table_name }),
            )
            .await?;
        Ok(response.rows_written)
    }
}
