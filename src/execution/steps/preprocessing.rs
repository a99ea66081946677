use super::{empty_preview, require, table_preview, StepHandler};
use crate::capability::{Capabilities, TransformRequest};
use crate::core::{
    EngineError, ExecutionContext, PreprocessingConfig, Preview, Slot, StepOutput, StepType,
};
use async_trait::async_trait;
use std::borrow::Cow;
use tracing::{info, warn};

#[async_trait]
impl StepHandler for PreprocessingConfig {
    fn step_type(&self) -> StepType {
        StepType::Preprocessing
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        caps: &Capabilities,
    ) -> Result<StepOutput, EngineError> {
        let mut data = Cow::Borrowed(require(ctx.data(), Slot::Data)?);

        let timestamp_col = self
            .forecasting
            .as_ref()
            .and_then(|f| f.timestamp_col.as_deref());
        if let Some(col) = timestamp_col {
            match data.column_index(col) {
                Some(index) => data.to_mut().sort_by_column(index),
                None => warn!("Timestamp column '{}' not found in data, rows left unsorted", col),
            }
        }

        let request = TransformRequest {
            script_path: self.script_path.clone(),
            target_col: self.target_col.clone(),
            horizons: self
                .forecasting
                .as_ref()
                .map(|f| f.horizons.clone())
                .unwrap_or_default(),
        };

        let result = caps
            .preprocessor
            .transform(&data, &request)
            .await
            .map_err(|e| EngineError::Transform(format!("{}: {}", self.script_path, e)))?;

        let target = result.target.or_else(|| self.target_col.clone());
        info!(
            "Preprocessed {} rows with {} (target: {})",
            result.data.len(),
            self.script_path,
            target.as_deref().unwrap_or("none")
        );

        Ok(StepOutput {
            data: Some(result.data),
            target,
            ..StepOutput::empty()
        })
    }

    fn preview(&self, ctx: &ExecutionContext) -> Preview {
        ctx.data()
            .map(table_preview)
            .unwrap_or_else(|| empty_preview(Slot::Data))
    }
}
