// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Graph command - visualize a pipeline forest

use miette::Result;

use super::{load_pipeline, GraphFormat};

/// Run the graph command
pub async fn run(pipeline: String, format: GraphFormat, _verbose: bool) -> Result<()> {
    let loaded = load_pipeline(&pipeline, false, false)?;
    let forest = &loaded.forest;

    let output = match format {
        GraphFormat::Text => forest.to_text(&loaded.spec),
        GraphFormat::Dot => forest.to_dot(),
        GraphFormat::Mermaid => forest.to_mermaid(),
    };

    println!("{}", output);

    Ok(())
}
