// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Plan command - show task instances without running them

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::{prepare, OutputFormat, PlanArgs};
use crate::artifacts::ArtifactManager;
use crate::config::EngineConfig;
use crate::plan::ExecutionPlan;

/// Run the plan command
pub async fn run(args: PlanArgs, config: Option<PathBuf>, verbose: bool) -> Result<()> {
    let config = EngineConfig::load(config.as_deref())?;
    let prepared = prepare(&args.target, &config)?;

    match args.format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&prepared.plan)
                .map_err(|e| miette::miette!("Failed to serialize plan: {}", e))?;
            println!("{}", json);
        }
        OutputFormat::Text => print_plan(&prepared.plan, &prepared.artifacts, verbose).await,
    }

    Ok(())
}

/// Print every task instance in dispatch order with its commands
pub(crate) async fn print_plan(plan: &ExecutionPlan, artifacts: &ArtifactManager, verbose: bool) {
    println!(
        "{}",
        format!("Plan for '{}': {} task instance(s)", plan.pipeline, plan.len()).bold()
    );

    let mut reusable = 0;
    for task in &plan.tasks {
        let reuse = artifacts
            .is_reusable(&task.stem, &task.expected_outputs(), &task.fingerprint)
            .await
            .unwrap_or(false);
        if reuse {
            reusable += 1;
        }

        println!();
        let status = if reuse { " (outputs present)".cyan() } else { "".normal() };
        println!(
            "  {} {} {}{}",
            task.id.to_string().dimmed(),
            task.label().bold(),
            format!("[{}]", task.action_key()).dimmed(),
            status
        );

        if !task.depends_on.is_empty() {
            let after: Vec<String> = task.depends_on.iter().map(ToString::to_string).collect();
            println!("      {} {}", "after:".dimmed(), after.join(" "));
        }

        for invocation in &task.invocations {
            println!("      $ {}", invocation.command_line());
        }

        if verbose {
            for output in task.expected_outputs() {
                println!("      {} {}", "→".blue(), output.display());
            }
        }
    }

    println!();
    if reusable > 0 {
        println!(
            "{}",
            format!("{} of {} instance(s) would be reused", reusable, plan.len()).dimmed()
        );
    }
}
