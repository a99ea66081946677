use super::{empty_preview, require, table_preview, StepHandler};
use crate::capability::{Capabilities, ModelRef};
use crate::core::{
    EngineError, ExecutionContext, PredictionConfig, Preview, Slot, StepOutput, StepType,
};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

#[async_trait]
impl StepHandler for PredictionConfig {
    fn step_type(&self) -> StepType {
        StepType::Prediction
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        caps: &Capabilities,
    ) -> Result<StepOutput, EngineError> {
        let data = require(ctx.data(), Slot::Data)?;

        // A model trained earlier in the context wins over the configured URI
        let model = match (ctx.model(), self.model_uri.as_deref()) {
            (Some(handle), _) => ModelRef::Handle(handle),
            (None, Some(uri)) => ModelRef::Uri(uri),
            (None, None) => {
                return Err(EngineError::Config(
                    "no model in context and no 'model_uri' configured".to_string(),
                ))
            }
        };

        let predictions = caps
            .predictor
            .predict(model, data)
            .await
            .map_err(|e| EngineError::Prediction(format!("{}: {}", model.name(), e)))?;

        if predictions.len() != data.len() {
            return Err(EngineError::Prediction(format!(
                "{} returned {} predictions for {} rows",
                model.name(),
                predictions.len(),
                data.len()
            )));
        }

        let mut output = data.clone();
        let model_names = vec![Value::String(model.name().to_string()); data.len()];
        output
            .push_column("prediction", predictions)
            .and_then(|_| output.push_column("model_name", model_names))
            .map_err(EngineError::Prediction)?;

        info!("Predicted {} rows with {}", output.len(), model.name());
        Ok(StepOutput {
            predictions: Some(output),
            ..StepOutput::empty()
        })
    }

    fn preview(&self, ctx: &ExecutionContext) -> Preview {
        ctx.predictions()
            .map(table_preview)
            .unwrap_or_else(|| empty_preview(Slot::Predictions))
    }
}
