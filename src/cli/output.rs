//! CLI output formatting

use crate::{
    core::{PipelineRun, Preview, RunStatus, StepStatus},
    execution::{ExecutionEvent, JobInfo},
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏰ ", "@ ");

/// Create a progress bar over the steps of a run
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a step status for display
pub fn format_step_status(status: StepStatus) -> String {
    match status {
        StepStatus::Pending => style("PENDING").dim().to_string(),
        StepStatus::Running => style("RUNNING").yellow().to_string(),
        StepStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        StepStatus::Failed => style("FAILED").red().to_string(),
        StepStatus::Skipped => style("SKIPPED").dim().to_string(),
    }
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// One-line summary of a run
pub fn format_run_summary(run: &PipelineRun) -> String {
    let status_icon = match run.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        RunStatus::Pending => INFO,
    };

    format!(
        "{} {} - pipeline {} - {} ({}/{} succeeded) - {}",
        status_icon,
        style(short_id(&run.id)).dim(),
        style(run.pipeline_id).bold(),
        format_status(run.status),
        run.count(StepStatus::Succeeded),
        run.steps.len(),
        style(run.started_at.format("%Y-%m-%d %H:%M:%S UTC")).cyan()
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
            total_steps,
            ..
        } => format!(
            "{} Starting pipeline {} ({} steps, run {})",
            ROCKET,
            style(pipeline_name).bold(),
            total_steps,
            style(short_id(run_id)).dim()
        ),
        ExecutionEvent::StepStarted {
            order,
            name,
            step_type,
            ..
        } => format!(
            "{} [{}] {} ({})",
            SPINNER,
            order,
            style(name).cyan(),
            style(step_type).dim()
        ),
        ExecutionEvent::StepSucceeded { order, preview, .. } => format!(
            "{} [{}] {}",
            CHECK,
            order,
            style(preview_headline(preview)).green()
        ),
        ExecutionEvent::StepFailed { order, error, .. } => {
            format!("{} [{}] {}", CROSS, order, style(error).red())
        }
        ExecutionEvent::StepSkipped { order, .. } => {
            format!("{} [{}] {}", INFO, order, style("skipped").dim())
        }
        ExecutionEvent::RunFinished { run_id, status, .. } => format!(
            "{} Run {} {}",
            INFO,
            style(short_id(run_id)).dim(),
            format_status(*status)
        ),
        ExecutionEvent::StepTested { order, ok, .. } => {
            let icon = if *ok { CHECK } else { CROSS };
            format!("{} Tested step {}", icon, order)
        }
    }
}

/// Short description of a preview
pub fn preview_headline(preview: &Preview) -> String {
    match preview {
        Preview::Table { rows, columns, .. } => {
            format!("{} rows x {} columns", rows, columns.len())
        }
        Preview::Json { data } => data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("done")
            .to_string(),
        Preview::Text { data } => data.clone(),
    }
}

/// Render a preview as aligned text
pub fn format_preview(preview: &Preview) -> String {
    match preview {
        Preview::Table {
            rows,
            columns,
            data,
        } => {
            let cells: Vec<Vec<String>> = data
                .iter()
                .map(|record| {
                    columns
                        .iter()
                        .map(|c| match record.get(c) {
                            Some(Value::String(s)) => s.clone(),
                            Some(v) => v.to_string(),
                            None => String::new(),
                        })
                        .collect()
                })
                .collect();

            let widths: Vec<usize> = columns
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    cells
                        .iter()
                        .map(|row| row[i].chars().count())
                        .chain(std::iter::once(c.chars().count()))
                        .max()
                        .unwrap_or(0)
                })
                .collect();

            let render = |values: Vec<&str>| {
                values
                    .iter()
                    .zip(&widths)
                    .map(|(v, w)| format!("{:<width$}", v, width = *w))
                    .collect::<Vec<_>>()
                    .join("  ")
            };

            let mut lines = vec![style(render(columns.iter().map(String::as_str).collect()))
                .bold()
                .to_string()];
            for row in &cells {
                lines.push(render(row.iter().map(String::as_str).collect()));
            }
            if *rows > data.len() {
                lines.push(
                    style(format!("... ({} more rows)", rows - data.len()))
                        .dim()
                        .to_string(),
                );
            }
            lines.join("\n")
        }
        Preview::Json { data } => {
            serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
        }
        Preview::Text { data } => data.clone(),
    }
}

/// One-line description of a scheduled job
pub fn format_job(job: &JobInfo) -> String {
    let next = job
        .next_fire_at
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} job {} - {} ({}) - {} - next: {}",
        CLOCK,
        job.id,
        style(&job.pipeline_name).bold(),
        job.pipeline_id,
        job.trigger.describe(),
        style(next).cyan()
    )
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
