//! Command-line interface

pub mod commands;
pub mod logging;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, RunCommand, ScheduleCommand, TestStepCommand, ValidateCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// MLOps pipeline execution engine
#[derive(Debug, Parser, Clone)]
#[command(name = "mlpipeline")]
#[command(version)]
#[command(about = "Run, test and schedule ML pipelines", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to engine settings YAML
    #[arg(short, long, global = true)]
    pub settings: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline
    Run(RunCommand),

    /// Run one step against the cached context of the step before it
    TestStep(TestStepCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// Show run history
    History(HistoryCommand),

    /// Arm pipeline schedules and fire runs until interrupted
    Schedule(ScheduleCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
