use super::{database_error, require, StepHandler};
use crate::capability::Capabilities;
use crate::core::{EngineError, ExecutionContext, Preview, SaveConfig, Slot, StepOutput, StepType};
use async_trait::async_trait;
use tracing::info;

#[async_trait]
impl StepHandler for SaveConfig {
    fn step_type(&self) -> StepType {
        StepType::Save
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        caps: &Capabilities,
    ) -> Result<StepOutput, EngineError> {
        let predictions = require(ctx.predictions(), Slot::Predictions)?;
        let db = &self.database;

        let written = caps
            .sink
            .write(predictions, db, &self.table_name)
            .await
            .map_err(|e| {
                database_error(
                    e,
                    format!(
                        "failed to write '{}' to {:?} database '{}' at {}:{}",
                        self.table_name, db.driver, db.database, db.host, db.port
                    ),
                )
            })?;

        info!("Saved {} rows to '{}'", written, self.table_name);
        Ok(StepOutput::empty())
    }

    fn preview(&self, ctx: &ExecutionContext) -> Preview {
        let rows = ctx.predictions().map(|p| p.len()).unwrap_or(0);
        Preview::Text {
            data: format!(
                "Saved {} prediction rows to table '{}' in database '{}'.",
                rows, self.table_name, self.database.database
            ),
        }
    }
}
