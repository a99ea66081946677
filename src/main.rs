use anyhow::{anyhow, Context, Result};
use mlpipeline::cli::commands::{
    HistoryCommand, RunCommand, ScheduleCommand, TestStepCommand, ValidateCommand,
};
use mlpipeline::cli::logging::init_logging;
use mlpipeline::cli::output::*;
use mlpipeline::cli::{Cli, Command};
use mlpipeline::core::config::{EngineSettings, PipelineConfig};
use mlpipeline::core::{Pipeline, PipelineRun, RunStatus};
use mlpipeline::execution::{ExecutionEvent, PipelineEngine, Scheduler};
use mlpipeline::persistence::{FsCacheStore, InMemoryRunRecorder, RunRecorder};
use mlpipeline::{Capabilities, ScriptCapabilities};
use std::sync::Arc;
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();
    init_logging(cli.verbose)?;

    let settings = EngineSettings::load(cli.settings.as_deref())
        .context("Failed to load engine settings")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, &settings).await?,
        Command::TestStep(cmd) => test_step(cmd, &settings).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::History(cmd) => show_history(cmd, &settings).await?,
        Command::Schedule(cmd) => run_schedules(cmd, &settings).await?,
    }

    Ok(())
}

fn load_pipeline(file: &str) -> Result<Pipeline> {
    let config = PipelineConfig::from_file(file).context("Failed to load pipeline config")?;
    Ok(config.to_pipeline()?)
}

#[cfg(feature = "sqlite")]
async fn open_recorder(settings: &EngineSettings, no_history: bool) -> Result<Arc<dyn RunRecorder>> {
    if no_history {
        return Ok(Arc::new(InMemoryRunRecorder::new()));
    }
    let recorder =
        mlpipeline::persistence::SqliteRunRecorder::open(&settings.history_db_path()).await?;
    Ok(Arc::new(recorder))
}

#[cfg(not(feature = "sqlite"))]
async fn open_recorder(_settings: &EngineSettings, _no_history: bool) -> Result<Arc<dyn RunRecorder>> {
    Ok(Arc::new(InMemoryRunRecorder::new()))
}

fn build_engine(settings: &EngineSettings, recorder: Arc<dyn RunRecorder>) -> PipelineEngine {
    let capabilities = Capabilities::from_provider(Arc::new(ScriptCapabilities::new(
        settings.script_program.clone(),
    )));
    let cache = Arc::new(FsCacheStore::new(settings.cache_dir.clone()));
    PipelineEngine::new(capabilities, cache, recorder)
}

async fn run_pipeline(cmd: &RunCommand, settings: &EngineSettings) -> Result<()> {
    let pipeline = load_pipeline(&cmd.file)?;
    println!("{} Loaded pipeline: {}", INFO, style(&pipeline.name).bold());

    let recorder = open_recorder(settings, cmd.no_history).await?;
    let engine = build_engine(settings, recorder.clone());

    let progress = create_progress_bar(pipeline.len());
    let bar = progress.clone();
    engine
        .add_event_handler(move |event| {
            bar.println(format_execution_event(&event));
            match &event {
                ExecutionEvent::StepStarted { name, .. } => bar.set_message(name.clone()),
                ExecutionEvent::StepSucceeded { .. }
                | ExecutionEvent::StepFailed { .. }
                | ExecutionEvent::StepSkipped { .. } => bar.inc(1),
                _ => {}
            }
        })
        .await;

    let run_id = engine.run(&pipeline).await?;
    progress.finish_and_clear();

    let run = recorder
        .load_run(run_id)
        .await?
        .ok_or_else(|| anyhow!("Run {} vanished from history", run_id))?;

    if !cmd.no_history {
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(run_id.to_string()).dim()
        );
    }

    if run.status == RunStatus::Succeeded {
        println!(
            "\n{} {} completed {}",
            CHECK,
            style(&pipeline.name).bold(),
            style("successfully").green()
        );
        Ok(())
    } else {
        println!(
            "\n{} {} {}",
            CROSS,
            style(&pipeline.name).bold(),
            style("failed").red()
        );
        if let Some(step) = run.failed_step() {
            error!(
                "Step {} failed: {}",
                step.order,
                step.error.as_deref().unwrap_or("unknown error")
            );
        }
        std::process::exit(1);
    }
}

async fn test_step(cmd: &TestStepCommand, settings: &EngineSettings) -> Result<()> {
    let pipeline = load_pipeline(&cmd.file)?;
    let step = pipeline.step(cmd.order).ok_or_else(|| {
        anyhow!("Pipeline '{}' has no step with order {}", pipeline.name, cmd.order)
    })?;

    let engine = build_engine(settings, Arc::new(InMemoryRunRecorder::new()));
    println!("{} Testing {}", SPINNER, style(step.label()).cyan());

    let result = engine.test_step(pipeline.id, cmd.order, step).await;
    match (&result.preview, &result.error) {
        (Some(preview), _) => {
            println!("{} {}", CHECK, style(preview_headline(preview)).green());
            println!("\n{}", format_preview(preview));
            Ok(())
        }
        (None, error) => {
            println!(
                "{} Step test failed: {}",
                CROSS,
                style(error.as_deref().unwrap_or("unknown error")).red()
            );
            std::process::exit(1);
        }
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let result = PipelineConfig::from_file(&cmd.file)
        .and_then(|config| Ok((config.to_pipeline()?, config)));

    match result {
        Ok((pipeline, config)) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&pipeline.name).bold());
            if let Some(description) = &pipeline.description {
                println!("  Description: {}", style(description).dim());
            }
            println!("  Steps: {}", style(pipeline.len()).cyan());
            for step in &pipeline.steps {
                println!("    {}", step.label());
            }
            match &pipeline.schedule {
                Some(schedule) if schedule.enabled => {
                    println!("  Schedule: {}", style(schedule.trigger.describe()).cyan())
                }
                Some(_) => println!("  Schedule: {}", style("disabled").dim()),
                None => {}
            }

            if cmd.json {
                println!("\n{}", serde_json::to_string_pretty(&config)?);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn show_history(cmd: &HistoryCommand, settings: &EngineSettings) -> Result<()> {
    let recorder = open_recorder(settings, false).await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match recorder.load_run(run_id).await? {
            Some(run) if cmd.json => println!("{}", serde_json::to_string_pretty(&run)?),
            Some(run) => print_run_details(&run, cmd.details),
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let pipelines = match cmd.pipeline_id {
        Some(id) => vec![id],
        None => recorder.list_pipelines().await?,
    };
    let mut runs = Vec::new();
    for pipeline_id in pipelines {
        runs.extend(recorder.list_runs(pipeline_id).await?);
    }
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs.truncate(cmd.limit);

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, runs.len());
    for run in &runs {
        println!("  {}", format_run_summary(run));
        if cmd.details {
            print_steps(run);
        }
    }

    Ok(())
}

fn print_steps(run: &PipelineRun) {
    for step in &run.steps {
        let detail = match (&step.error, &step.payload) {
            (Some(error), _) => style(error.clone()).red().to_string(),
            (None, Some(preview)) => style(preview_headline(preview)).dim().to_string(),
            (None, None) => String::new(),
        };
        println!(
            "      [{}] {} {}",
            step.order,
            format_step_status(step.status),
            detail
        );
    }
}

fn print_run_details(run: &PipelineRun, details: bool) {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(run.id).cyan());
    println!("  Pipeline: {}", style(run.pipeline_id).bold());
    println!("  Status: {}", format_status(run.status));
    println!("  Started: {}", style(run.started_at.to_rfc3339()).dim());
    if let Some(finished) = run.finished_at {
        println!("  Finished: {}", style(finished.to_rfc3339()).dim());
        if let Ok(duration) = finished.signed_duration_since(run.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Progress: {}",
        style(format!("{:.0}%", run.progress() * 100.0)).cyan()
    );
    print_steps(run);

    if details && !run.logs.is_empty() {
        println!("\n  {}", style("Logs:").bold());
        for line in &run.logs {
            println!(
                "    {} {}",
                style(line.at.format("%H:%M:%S")).dim(),
                line.message
            );
        }
    }
}

async fn run_schedules(cmd: &ScheduleCommand, settings: &EngineSettings) -> Result<()> {
    let recorder = open_recorder(settings, cmd.no_history).await?;
    let engine = Arc::new(build_engine(settings, recorder));
    engine
        .add_event_handler(|event| {
            if matches!(
                event,
                ExecutionEvent::RunStarted { .. } | ExecutionEvent::RunFinished { .. }
            ) {
                println!("{}", format_execution_event(&event));
            }
        })
        .await;

    let scheduler = Scheduler::new(engine);
    for file in &cmd.files {
        let pipeline = Arc::new(load_pipeline(file)?);
        match pipeline.schedule {
            Some(schedule) if schedule.enabled => {
                scheduler.start_pipeline(pipeline).await?;
            }
            _ => println!(
                "{} {} has no enabled schedule, skipping",
                WARN,
                style(&pipeline.name).bold()
            ),
        }
    }

    let jobs = scheduler.jobs().await;
    if jobs.is_empty() {
        println!("{} Nothing to schedule", INFO);
        return Ok(());
    }
    for job in &jobs {
        println!("{}", format_job(job));
    }
    println!("{} Waiting for triggers, press Ctrl-C to stop", INFO);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    println!("\n{} Stopping scheduler", INFO);
    scheduler.shutdown().await;

    Ok(())
}
