use super::{database_error, empty_preview, table_preview, StepHandler};
use crate::capability::Capabilities;
use crate::core::{
    EngineError, ExecutionContext, ExtractionConfig, Preview, Slot, StepOutput, StepType,
};
use async_trait::async_trait;
use tracing::info;

#[async_trait]
impl StepHandler for ExtractionConfig {
    fn step_type(&self) -> StepType {
        StepType::Extraction
    }

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        caps: &Capabilities,
    ) -> Result<StepOutput, EngineError> {
        let db = &self.database;
        let data = caps.source.fetch(db, &self.query).await.map_err(|e| {
            database_error(
                e,
                format!(
                    "failed to fetch from {:?} database '{}' at {}:{}",
                    db.driver, db.database, db.host, db.port
                ),
            )
        })?;

        info!("Extracted {} rows ({} columns)", data.len(), data.columns.len());
        Ok(StepOutput {
            data: Some(data),
            ..StepOutput::empty()
        })
    }

    fn preview(&self, ctx: &ExecutionContext) -> Preview {
        ctx.data()
            .map(table_preview)
            .unwrap_or_else(|| empty_preview(Slot::Data))
    }
}
