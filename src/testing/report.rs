//! Per-case results and the batch report

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::common::{now_millis, paths, Result};

use super::case::TestCase;
use super::executor::ExecuteOptions;
use super::scheduler::BatchOptions;

/// Outcome of one test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub name: String,
    pub working_dir: PathBuf,
    pub input_text: String,
    pub success: bool,
    pub error: Option<String>,
    /// Non-fatal problem, e.g. a failed capture
    pub warning: Option<String>,
    pub captured: Option<String>,
    /// Persisted capture artifact
    pub artifact: Option<PathBuf>,
    pub port: Option<u16>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// An unfinished, unsuccessful result for `case`
    pub fn new(case: &TestCase, started_at: DateTime<Utc>) -> Self {
        Self {
            name: case.name.clone(),
            working_dir: case.working_dir.clone(),
            input_text: case.input_text.clone(),
            success: false,
            error: None,
            warning: None,
            captured: None,
            artifact: None,
            port: case.port,
            started_at,
            ended_at: started_at,
            duration_ms: 0,
        }
    }

    /// Stamp the end time and duration
    pub fn finish(mut self) -> Self {
        self.ended_at = Utc::now();
        self.duration_ms = duration_ms(self.started_at, self.ended_at);
        self
    }
}

/// Options a batch ran with, as recorded in its report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportOptions {
    #[serde(flatten)]
    pub batch: BatchOptions,
    pub close_app_after_finish: bool,
    /// Reply wait applied to cases without their own
    pub bot_reply_timeout_ms: Option<u64>,
}

impl ReportOptions {
    pub fn new(batch: &BatchOptions, execute: &ExecuteOptions) -> Self {
        Self {
            batch: batch.clone(),
            close_app_after_finish: execute.close_app_after_finish,
            bot_reply_timeout_ms: execute
                .bot_reply_timeout
                .map(|timeout| timeout.as_millis() as u64),
        }
    }
}

/// Aggregated outcome of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub options: ReportOptions,
    /// Executed cases; `success + failed`
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    /// Cases never admitted because the batch stopped on an error
    pub skipped: usize,
    /// Results in submission order
    pub details: Vec<ExecutionResult>,
    pub report_file: Option<PathBuf>,
}

impl BatchReport {
    pub fn new(
        task_id: String,
        options: ReportOptions,
        started_at: DateTime<Utc>,
        details: Vec<ExecutionResult>,
        skipped: usize,
    ) -> Self {
        let ended_at = Utc::now();
        let success = details.iter().filter(|r| r.success).count();
        Self {
            task_id,
            started_at,
            ended_at,
            duration_ms: duration_ms(started_at, ended_at),
            options,
            total: details.len(),
            success,
            failed: details.len() - success,
            skipped,
            details,
            report_file: None,
        }
    }

    /// Whether every submitted case ran and succeeded
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Write the report as `<task id>.json` into `dir`
    pub fn persist(&mut self, dir: &Path) -> Result<PathBuf> {
        paths::ensure_dir(dir)?;
        let path = dir.join(format!("{}.json", self.task_id));
        self.report_file = Some(path.clone());
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn print_summary(&self) {
        println!("\n{}", "Results:".cyan());
        for result in &self.details {
            if result.success {
                println!(
                    "  {} {} {}",
                    "✓".green(),
                    result.name,
                    format!("({} ms)", result.duration_ms).dimmed()
                );
            } else {
                println!(
                    "  {} {} {}",
                    "✗".red(),
                    result.name,
                    result.error.as_deref().unwrap_or("failed").red()
                );
            }
            if let Some(warning) = &result.warning {
                println!("      {} {}", "warning:".yellow(), warning);
            }
            if let Some(artifact) = &result.artifact {
                println!("      {}", artifact.display().to_string().dimmed());
            }
        }

        println!();
        let summary = format!(
            "{} total, {} passed, {} failed, {} skipped in {:.1}s",
            self.total,
            self.success,
            self.failed,
            self.skipped,
            self.duration_ms as f64 / 1000.0
        );
        if self.all_passed() {
            println!("{} {}", "✓".green().bold(), summary.green().bold());
        } else {
            println!("{} {}", "✗".red().bold(), summary.red().bold());
        }
        if let Some(file) = &self.report_file {
            println!("  Report: {}", file.display().to_string().dimmed());
        }
    }
}

/// Fresh task identifier
pub fn new_task_id() -> String {
    format!("task-{}", now_millis())
}

fn duration_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}
