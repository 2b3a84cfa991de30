// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Run report
//!
//! The final state of every task instance, why it ended there, and where
//! it sits in its tree.

use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::TaskState;
use crate::errors::{BackendFailure, ReconflowError, ReconflowResult};
use crate::pipeline::Software;
use crate::plan::{Qualifier, TaskId};

/// Outcome of one task instance
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub task: String,
    pub node: String,
    pub software: Software,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<Qualifier>,
    pub state: TaskState,
    /// Error message for failed and cancelled instances
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    /// How the backend failed, for backend execution errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<BackendFailure>,
    /// Node names from the tree root down to this node
    pub ancestry: Vec<String>,
    pub outputs: Vec<PathBuf>,
    /// Outputs were kept from an earlier run
    pub reused: bool,
    pub duration_secs: f64,
}

impl TaskReport {
    pub fn set_cause(&mut self, error: &ReconflowError) {
        self.cause = Some(error.to_string());
        self.error_kind = Some(error.taxonomy());
        self.failure = error.backend_failure();
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    pub tasks: Vec<TaskReport>,
    pub duration_secs: f64,
    /// The operator aborted the run
    pub aborted: bool,
}

impl RunReport {
    pub fn new(pipeline: impl Into<String>, tasks: Vec<TaskReport>, duration: Duration, aborted: bool) -> Self {
        Self {
            pipeline: pipeline.into(),
            tasks,
            duration_secs: duration.as_secs_f64(),
            aborted,
        }
    }

    /// True only if every instance succeeded
    pub fn success(&self) -> bool {
        self.tasks.iter().all(|t| t.state == TaskState::Succeeded)
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.state == state).count()
    }

    pub fn reused(&self) -> usize {
        self.tasks.iter().filter(|t| t.reused).count()
    }

    /// Report for a task label
    pub fn task(&self, label: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.task == label)
    }

    /// Print per-instance results and a summary line
    pub fn print_summary(&self) {
        println!();
        for task in &self.tasks {
            let marker = match task.state {
                TaskState::Succeeded if task.reused => "↺".cyan(),
                TaskState::Succeeded => "✓".green(),
                TaskState::Failed => "✗".red(),
                TaskState::Cancelled => "○".yellow(),
                _ => "?".dimmed(),
            };
            let mut line = format!("  {} {}", marker, task.task.bold());
            if task.state == TaskState::Succeeded && !task.reused {
                line.push_str(&format!(" ({:.1}s)", task.duration_secs));
            }
            if task.reused {
                line.push_str(&format!(" {}", "(reused)".dimmed()));
            }
            println!("{}", line);

            if let Some(cause) = &task.cause {
                println!("      {}", cause.dimmed());
                if task.ancestry.len() > 1 {
                    println!("      {} {}", "path:".dimmed(), task.ancestry.join(" → ").dimmed());
                }
            }
        }

        println!();
        let summary = format!(
            "{} succeeded ({} reused), {} failed, {} cancelled in {:.1}s",
            self.count(TaskState::Succeeded),
            self.reused(),
            self.count(TaskState::Failed),
            self.count(TaskState::Cancelled),
            self.duration_secs
        );
        if self.success() {
            println!("{}", format!("Pipeline '{}' completed: {}", self.pipeline, summary).green());
        } else if self.aborted {
            println!("{}", format!("Pipeline '{}' aborted: {}", self.pipeline, summary).yellow());
        } else {
            println!("{}", format!("Pipeline '{}' failed: {}", self.pipeline, summary).red());
        }
    }

    /// Write the report as pretty JSON
    pub fn write_json(&self, path: &Path) -> ReconflowResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| ReconflowError::FileWriteError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }
}
