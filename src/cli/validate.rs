// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Validate command - check a pipeline document

use colored::Colorize;
use miette::Result;

use crate::errors::RecoverySuggestion;
use crate::params::SchemaRegistry;
use crate::pipeline::{PipelineDocument, PipelineLoader};
use crate::utils::{print_error, print_success};

/// Run the validate command
pub async fn run(pipeline: String, verbose: bool) -> Result<()> {
    println!("{}", "Validating pipeline...".bold());
    println!();

    let document = match PipelineDocument::resolve(&pipeline) {
        Ok(document) => document,
        Err(e) => {
            eprintln!("  {} Failed to read pipeline", "✗".red());
            eprintln!();
            return Err(e.into());
        }
    };
    print_success(&format!("Read {}", document.source));

    let registry = SchemaRegistry::builtin();
    let loaded = match PipelineLoader::new(&registry).load(&document) {
        Ok(loaded) => loaded,
        Err(e) => {
            let errors = e.into_errors();

            println!();
            println!("{} ({}):", "Errors".red().bold(), errors.len());
            for error in &errors {
                print_error(&error.to_string());
            }

            let suggestions: Vec<_> = errors.iter().filter_map(RecoverySuggestion::for_error).collect();
            if !suggestions.is_empty() {
                println!();
                println!("{}:", "Suggestions".bold());
                for suggestion in suggestions {
                    print!("{}", suggestion);
                }
            }

            println!();
            return Err(miette::miette!(
                "Pipeline validation failed with {} error(s)",
                errors.len()
            ));
        }
    };

    let spec = &loaded.spec;
    print_success("Schema, graph and parameters are valid");

    if verbose {
        println!();
        println!("{}:", "Pipeline summary".bold());
        println!("  Name:     {}", spec.name);
        println!("  Space:    {}", spec.space);
        if !spec.atlases.is_empty() {
            println!("  Atlases:  {}", spec.atlases.join(", "));
        }
        println!(
            "  Nodes:    {} in {} tree(s)",
            spec.nodes.len(),
            loaded.forest.tree_count()
        );
        for (_, node) in loaded.nodes_in_order() {
            println!(
                "    - {} ({} {}) {}",
                node.name,
                node.software,
                node.action,
                format!("<- {}", node.input).dimmed()
            );
        }
    }

    println!();
    println!("{}", "Pipeline is valid!".green().bold());
    Ok(())
}
