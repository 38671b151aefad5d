//! CLI output formatting

use crate::{
    core::ExecutionStatus,
    execution::{DryRunStatus, ExecutionEvent, PipeDryRunOutput},
    persistence::ExecutionSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
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
pub static BRANCH: Emoji<'_, '_> = Emoji("🔀 ", "? ");

/// Create a progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let template = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    progress.set_style(template.progress_chars("#>-"));
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format execution summary for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        _ => INFO,
    };

    let detail = match (&summary.output_name, &summary.error) {
        (Some(name), _) => style(format!("-> {}", name)).cyan().to_string(),
        (None, Some(error)) => style(error).dim().to_string(),
        (None, None) => String::new(),
    };

    format!(
        "{} {} - {} - {} {}",
        status_icon,
        style(short_id(&summary.execution_id.to_string())).dim(),
        style(&summary.pipe_code).bold(),
        format_status(summary.status),
        detail
    )
}

/// Format one dry-run result
pub fn format_dry_run_result(code: &str, output: &PipeDryRunOutput) -> String {
    match output.status {
        DryRunStatus::Success => format!("{} {}", CHECK, style(code).green()),
        DryRunStatus::Failure => format!(
            "{} {}: {}",
            CROSS,
            style(code).red(),
            style(output.error_message.as_deref().unwrap_or("unknown error")).dim()
        ),
    }
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            execution_id,
            pipe_code,
            ..
        } => format!(
            "{} Running pipe {} ({})",
            ROCKET,
            style(pipe_code).bold(),
            style(short_id(&execution_id.to_string())).dim()
        ),
        ExecutionEvent::PipeStarted { pipe_code, kind } => {
            format!("{} {} {}", SPINNER, style(pipe_code).cyan(), style(kind).dim())
        }
        ExecutionEvent::PipeCompleted {
            pipe_code,
            output_name,
        } => format!(
            "{} {} → {}",
            CHECK,
            style(pipe_code).green(),
            style(output_name).cyan()
        ),
        ExecutionEvent::PipeFailed { pipe_code, error } => {
            format!("{} {}: {}", CROSS, style(pipe_code).red(), style(error).dim())
        }
        ExecutionEvent::BranchChosen {
            pipe_code,
            evaluated_expression,
            chosen_pipe_code,
        } => format!(
            "{} {} evaluated '{}' → {}",
            BRANCH,
            style(pipe_code).yellow(),
            evaluated_expression,
            style(chosen_pipe_code).cyan()
        ),
        ExecutionEvent::ParallelMerged { pipe_code, results } => format!(
            "{} {} merged {}",
            INFO,
            style(pipe_code).dim(),
            style(results.join(", ")).cyan()
        ),
        ExecutionEvent::RunFinished {
            execution_id,
            status,
        } => format!(
            "{} Run ({}) {}",
            INFO,
            style(short_id(&execution_id.to_string())).dim(),
            format_status(*status)
        ),
    }
}

/// Format output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
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

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
