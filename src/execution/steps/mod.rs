//! Per-variant step behavior
//!
//! Each typed step config implements [`StepHandler`]. Dispatch from a
//! [`StepKind`] to its handler is an explicit match, so adding a variant is a
//! compile error until every variant is handled.

mod extraction;
mod prediction;
mod preprocessing;
mod save;
mod training;

use crate::capability::{Capabilities, CapabilityError};
use crate::core::{
    produced_slots, required_slots, EngineError, ExecutionContext, Preview, Slot, StepKind,
    StepOutput, StepType, Table,
};
use async_trait::async_trait;

/// Rows included in a table preview
pub const PREVIEW_ROWS: usize = 5;

/// Behavior of one step variant
#[async_trait]
pub trait StepHandler: Send + Sync {
    fn step_type(&self) -> StepType;

    /// Slots that must be filled before the step runs
    fn requires(&self) -> &'static [Slot] {
        required_slots(self.step_type())
    }

    /// Slots the step may write
    fn produces(&self) -> &'static [Slot] {
        produced_slots(self.step_type())
    }

    /// Run the step against the incoming context
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        caps: &Capabilities,
    ) -> Result<StepOutput, EngineError>;

    /// Shape-tagged summary of the context after the step ran
    fn preview(&self, ctx: &ExecutionContext) -> Preview;
}

/// Handler for a step variant
pub fn handler_for(kind: &StepKind) -> &dyn StepHandler {
    match kind {
        StepKind::Extraction(config) => config,
        StepKind::Preprocessing(config) => config,
        StepKind::Training(config) => config,
        StepKind::Prediction(config) => config,
        StepKind::Save(config) => config,
    }
}

/// Row count, columns and the first rows as records
pub fn table_preview(table: &Table) -> Preview {
    Preview::Table {
        rows: table.len(),
        columns: table.columns.clone(),
        data: table.head_records(PREVIEW_ROWS),
    }
}

/// Read a slot the executor has already checked
fn require<'a, T>(value: Option<&'a T>, slot: Slot) -> Result<&'a T, EngineError>
where
    T: ?Sized,
{
    value.ok_or_else(|| EngineError::Config(format!("missing required context slot '{}'", slot)))
}

/// Only an unreachable backend is a connection error; a query or write the
/// backend rejected points at the step's configuration
fn database_error(err: CapabilityError, action: String) -> EngineError {
    match err {
        CapabilityError::Unreachable(_) => EngineError::Connection(format!("{}: {}", action, err)),
        CapabilityError::Failed(_) | CapabilityError::InvalidResponse(_) => {
            EngineError::Config(format!("{}: {}", action, err))
        }
    }
}

fn empty_preview(slot: Slot) -> Preview {
    Preview::Text {
        data: format!("No {} in context.", slot),
    }
}
