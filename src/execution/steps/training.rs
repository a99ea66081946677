use super::{empty_preview, require, StepHandler};
use crate::capability::Capabilities;
use crate::core::{
    EngineError, ExecutionContext, Preview, Slot, StepOutput, StepType, TrainingConfig,
};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

#[async_trait]
impl StepHandler for TrainingConfig {
    fn step_type(&self) -> StepType {
        StepType::Training
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        caps: &Capabilities,
    ) -> Result<StepOutput, EngineError> {
        let data = require(ctx.data(), Slot::Data)?;
        let target = require(ctx.target(), Slot::Target)?;

        if data.column_index(target).is_none() {
            return Err(EngineError::Config(format!(
                "target column '{}' not found in data",
                target
            )));
        }

        let trained = caps
            .trainer
            .fit(data, target, &self.model, &self.tracking)
            .await
            .map_err(|e| EngineError::Training(format!("{}: {}", self.model.name, e)))?;

        // Cached contexts are JSON, which has no NaN or infinity
        if let Some((name, value)) = trained.metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(EngineError::Training(format!(
                "{}: metric '{}' is not a finite number ({})",
                self.model.name, name, value
            )));
        }

        info!(
            "Trained {} ({}) on {} rows, experiment '{}'",
            self.model.name,
            self.model.task_type.as_str(),
            data.len(),
            self.tracking.experiment_name
        );

        Ok(StepOutput {
            model: Some(trained.model),
            metrics: Some(trained.metrics),
            ..StepOutput::empty()
        })
    }

    fn preview(&self, ctx: &ExecutionContext) -> Preview {
        let Some(model) = ctx.model() else {
            return empty_preview(Slot::Model);
        };
        Preview::Json {
            data: json!({
                "message": "Model trained successfully.",
                "model_name": model.name,
                "task_type": model.task_type,
                "tracking_run_id": model.tracking_run_id,
                "metrics": ctx.metrics().cloned().unwrap_or_default(),
            }),
        }
    }
}
