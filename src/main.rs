// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! reconflow - Diffusion MRI reconstruction workflows

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reconflow::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reconflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    reconflow::utils::configure_colors();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => reconflow::cli::run::run(args, cli.config, cli.verbose).await,
        Commands::Validate { pipeline } => {
            reconflow::cli::validate::run(pipeline, cli.verbose).await
        }
        Commands::Plan(args) => reconflow::cli::plan::run(args, cli.config, cli.verbose).await,
        Commands::Graph { pipeline, format } => {
            reconflow::cli::graph::run(pipeline, format, cli.verbose).await
        }
        Commands::Pipelines => reconflow::cli::pipelines::run(cli.verbose).await,
        Commands::Records { action } => reconflow::cli::records::run(action, cli.verbose).await,
    }
}
