// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Pipelines command - list the prepackaged pipelines

use colored::Colorize;
use miette::Result;

use crate::pipeline::{prepackaged_names, PipelineDocument};
use crate::utils::print_header;

/// Run the pipelines command
pub async fn run(verbose: bool) -> Result<()> {
    print_header("Prepackaged pipelines");

    for name in prepackaged_names() {
        let document = PipelineDocument::prepackaged(name)?;
        let description = document
            .value
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or_default();

        if verbose && !description.is_empty() {
            println!("  {} {}", name.bold(), description.dimmed());
        } else {
            println!("  {}", name.bold());
        }
    }

    println!();
    println!(
        "{}",
        "Pass a name wherever a pipeline file is expected, e.g. 'reconflow validate dsi_studio_gqi'."
            .dimmed()
    );
    Ok(())
}
