//! Step executor - runs individual steps against their capabilities

use crate::{
    capability::Capabilities,
    core::{EngineError, ExecutionContext, PipelineStep, Preview},
    execution::steps::handler_for,
};
use tracing::{debug, error, info};

/// Context and preview produced by a successful step
#[derive(Debug, Clone)]
pub struct StepExecution {
    /// Incoming context with the step's output applied
    pub context: ExecutionContext,
    pub preview: Preview,
}

/// Executes a single step
pub struct StepExecutor {
    capabilities: Capabilities,
}

impl StepExecutor {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    /// Execute a step on a copy of `input`
    ///
    /// The incoming context is never modified, so a snapshot taken before the
    /// step stays valid whatever the step does.
    pub async fn execute(
        &self,
        step: &PipelineStep,
        input: &ExecutionContext,
    ) -> Result<StepExecution, EngineError> {
        info!("Executing {}", step.label());
        let handler = handler_for(&step.kind);

        let missing = input.missing(handler.requires());
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(|s| s.to_string()).collect();
            let err = EngineError::Config(format!(
                "{}: missing required context slot(s): {}",
                step.label(),
                names.join(", ")
            ));
            error!("{}", err);
            return Err(err);
        }

        let output = handler.execute(input, &self.capabilities).await.map_err(|e| {
            error!("{} failed: {}", step.label(), e);
            e
        })?;
        debug!("{} wrote slots {:?}", step.label(), output.written());

        let mut context = input.clone();
        context.apply(output, handler.produces())?;
        let preview = handler.preview(&context);

        Ok(StepExecution { context, preview })
    }
}
