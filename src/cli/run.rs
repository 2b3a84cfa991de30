// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Run command - execute a pipeline

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::plan::print_plan;
use super::{prepare, Prepared, RunArgs};
use crate::config::EngineConfig;
use crate::errors::RecoverySuggestion;
use crate::scheduler::{ProcessRunner, Scheduler, TaskState};
use crate::utils::{create_spinner, print_info, print_warning};

/// Run a pipeline
pub async fn run(args: RunArgs, config: Option<PathBuf>, verbose: bool) -> Result<()> {
    let mut config = EngineConfig::load(config.as_deref())?;
    if let Some(workers) = args.workers {
        if workers == 0 {
            return Err(miette::miette!("--workers must be at least 1"));
        }
        config.workers = Some(workers);
    }
    for timeout in &args.timeouts {
        config.apply_timeout_override(timeout)?;
    }

    let spinner = create_spinner("Planning task instances...");
    let prepared = prepare(&args.target, &config);
    spinner.finish_and_clear();

    let Prepared {
        pipeline,
        plan,
        artifacts,
        adapters,
        tools,
    } = prepared?;

    // Instances whose program is missing fail on their own; everything
    // else still runs.
    let missing = adapters.missing_tools(&pipeline.spec, &tools);
    if !missing.is_empty() {
        eprintln!("{}", "Missing toolkits:".yellow().bold());
        for error in &missing {
            print_warning(&error.to_string());
            if verbose {
                if let Some(suggestion) = RecoverySuggestion::for_error(error) {
                    eprint!("{}", suggestion);
                }
            }
        }
        eprintln!();
    }

    if args.dry_run {
        print_plan(&plan, &artifacts, verbose).await;
        println!("{}", "Dry run: nothing was executed.".dimmed());
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping running tasks");
            trigger.cancel();
        }
    });

    let options = config.scheduler_options(!args.no_progress);
    let scheduler = Scheduler::new(Arc::new(ProcessRunner::new()), Arc::new(artifacts), options);
    let report = scheduler.run(&plan, cancel).await;

    report.print_summary();

    if let Some(path) = &args.report {
        report.write_json(path)?;
        print_info(&format!("Report written to {}", path.display()));
    }

    if !report.success() {
        return Err(miette::miette!(
            "{} of {} task instance(s) did not succeed",
            report.tasks.len() - report.count(TaskState::Succeeded),
            report.tasks.len()
        ));
    }

    if verbose {
        println!();
        println!("{}:", "Outputs".bold());
        for task in &report.tasks {
            for output in &task.outputs {
                println!("  - {}", output.display());
            }
        }
    }

    Ok(())
}
