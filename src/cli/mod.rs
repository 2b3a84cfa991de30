// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for reconflow.

pub mod graph;
pub mod pipelines;
pub mod plan;
pub mod records;
pub mod run;
pub mod validate;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;

use crate::artifacts::ArtifactManager;
use crate::backends::{AdapterRegistry, ToolPaths};
use crate::config::EngineConfig;
use crate::params::SchemaRegistry;
use crate::pipeline::{LoadedPipeline, PipelineDocument, PipelineLoader};
use crate::plan::{ExecutionPlan, Planner, RunInputs};

/// Diffusion MRI reconstruction workflows
///
/// Validate, plan and run pipelines of reconstruction toolkits.
#[derive(Parser, Debug)]
#[clap(
    name = "reconflow",
    version,
    about = "Pipeline graph engine for diffusion MRI reconstruction workflows",
    long_about = None,
    after_help = "Examples:\n\
        reconflow pipelines                           List bundled pipelines\n\
        reconflow validate my_pipeline.json           Check a pipeline document\n\
        reconflow plan dsi_studio_gqi --input-root sub-01 --output-root out\n\
        reconflow run dsi_studio_gqi --input-root sub-01 --output-root out\n\n\
        See 'reconflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Engine configuration file (default: reconflow.toml in the config dir)
    #[clap(long, global = true, value_name = "FILE", env = "RECONFLOW_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline
    Run(RunArgs),

    /// Validate a pipeline document and report every problem
    Validate {
        /// Pipeline file or prepackaged pipeline name
        pipeline: String,
    },

    /// Show every task instance and its commands without running them
    Plan(PlanArgs),

    /// Show pipeline as a graph
    Graph {
        /// Pipeline file or prepackaged pipeline name
        pipeline: String,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },

    /// List the prepackaged pipelines
    Pipelines,

    /// Completion record management
    Records {
        #[clap(subcommand)]
        action: RecordsAction,
    },
}

/// What to run and where
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Pipeline file or prepackaged pipeline name
    pub pipeline: String,

    /// Preprocessed data for one subject
    #[clap(long, value_name = "DIR")]
    pub input_root: PathBuf,

    /// Where reconstruction outputs are written
    #[clap(long, value_name = "DIR")]
    pub output_root: PathBuf,

    /// Atlas images (default: <input-root>/atlases)
    #[clap(long, value_name = "DIR")]
    pub atlas_dir: Option<PathBuf>,

    /// Use fast, scientifically meaningless parameters
    #[clap(long)]
    pub sloppy: bool,

    /// Turn off ODF plots on every node that makes them
    #[clap(long)]
    pub skip_odf_plots: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[clap(flatten)]
    pub target: TargetArgs,

    /// Worker pool size (default: number of CPUs)
    #[clap(short = 'j', long)]
    pub workers: Option<usize>,

    /// Timeout override, repeatable
    #[clap(long = "timeout", value_name = "SOFTWARE:ACTION=SECS")]
    pub timeouts: Vec<String>,

    /// Write the run report as JSON
    #[clap(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Show what would run without running it
    #[clap(long)]
    pub dry_run: bool,

    /// Hide the progress bar
    #[clap(long)]
    pub no_progress: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[clap(flatten)]
    pub target: TargetArgs,

    /// Output format
    #[clap(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Completion record actions
#[derive(Subcommand, Debug, Clone)]
pub enum RecordsAction {
    /// Show record statistics
    Stats {
        #[clap(long, value_name = "DIR")]
        output_root: PathBuf,
    },

    /// Remove every record, forcing the next run to redo its work
    Clear {
        #[clap(long, value_name = "DIR")]
        output_root: PathBuf,

        /// Skip confirmation
        #[clap(short, long)]
        yes: bool,
    },
}

/// Output format for plan command
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Graph output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

/// A pipeline loaded and planned against one subject
pub(crate) struct Prepared {
    pub pipeline: LoadedPipeline,
    pub plan: ExecutionPlan,
    pub artifacts: ArtifactManager,
    pub adapters: AdapterRegistry,
    pub tools: ToolPaths,
}

/// Load a pipeline document, applying the document rewrites the flags ask for
pub(crate) fn load_pipeline(
    pipeline: &str,
    sloppy: bool,
    skip_odf_plots: bool,
) -> miette::Result<LoadedPipeline> {
    let registry = SchemaRegistry::builtin();
    let mut document = PipelineDocument::resolve(pipeline)?;

    if sloppy {
        let changed = document.make_sloppy();
        info!("Sloppy mode rewrote {} node(s)", changed);
    }
    if skip_odf_plots {
        let changed = document.skip_odf_plots(&registry);
        info!("Disabled ODF plots on {} node(s)", changed);
    }

    Ok(PipelineLoader::new(&registry).load(&document)?)
}

/// Load, locate inputs and plan every task instance
pub(crate) fn prepare(target: &TargetArgs, config: &EngineConfig) -> miette::Result<Prepared> {
    let pipeline = load_pipeline(&target.pipeline, target.sloppy, target.skip_odf_plots)?;

    let atlas_dir = target.atlas_dir.as_deref().or(config.atlas_dir.as_deref());
    let inputs = RunInputs::locate(&target.input_root, &pipeline.spec.space, atlas_dir)?;

    let artifacts = ArtifactManager::new(&target.output_root, &pipeline.spec.space);
    let adapters = AdapterRegistry::with_builtin();
    let tools = config.tool_paths();

    let plan = Planner::new(&adapters, &artifacts, &tools, &inputs).plan(&pipeline)?;

    Ok(Prepared {
        pipeline,
        plan,
        artifacts,
        adapters,
        tools,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::parse_from([
            "reconflow",
            "run",
            "dsi_studio_gqi",
            "--input-root",
            "in",
            "--output-root",
            "out",
            "--timeout",
            "DSI Studio:tractography=60",
            "--timeout",
            "mrtrix3:csd=10",
            "-j",
            "2",
            "--sloppy",
        ]);

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.target.pipeline, "dsi_studio_gqi");
        assert_eq!(args.timeouts.len(), 2);
        assert_eq!(args.workers, Some(2));
        assert!(args.target.sloppy);
        assert!(!args.dry_run);
    }

    #[test]
    fn test_load_pipeline_reports_unknown_name() {
        assert!(load_pipeline("no_such_pipeline", false, false).is_err());
        assert!(load_pipeline("mrtrix_multishell_msmt", true, true).is_ok());
    }
}
