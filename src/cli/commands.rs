//! CLI command definitions

use clap::Args;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

/// Test a single step
#[derive(Debug, Args, Clone)]
pub struct TestStepCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Order of the step to test
    #[arg(short, long)]
    pub order: u32,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline ID to filter by
    #[arg(short, long)]
    pub pipeline_id: Option<i64>,

    /// Show a specific run
    #[arg(long)]
    pub run_id: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show step results and run logs
    #[arg(long)]
    pub details: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Run pipeline schedules
#[derive(Debug, Args, Clone)]
pub struct ScheduleCommand {
    /// Pipeline YAML files; each needs a `schedule` section
    #[arg(short, long = "file", required = true)]
    pub files: Vec<String>,

    /// Don't save runs to history
    #[arg(long)]
    pub no_history: bool,
}
