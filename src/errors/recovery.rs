// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Error recovery suggestions
//!
//! Provides actionable suggestions for recovering from errors.

use super::ReconflowError;

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
}

impl RecoverySuggestion {
    /// Pick a suggestion for an error, if one applies
    pub fn for_error(error: &ReconflowError) -> Option<Self> {
        match error {
            ReconflowError::GraphCycle { nodes } => Some(Self::fix_cycle(nodes)),
            ReconflowError::UnresolvedReference { node, reference } => {
                Some(Self::fix_reference(node, reference))
            }
            ReconflowError::ToolNotFound { tool, .. } => Some(Self::install_toolkit(tool)),
            ReconflowError::MissingAtlases { node } => Some(Self::add_atlases(node)),
            _ => None,
        }
    }

    /// Suggest installing a missing toolkit
    pub fn install_toolkit(tool: &str) -> Self {
        match tool {
            "dsi_studio" => Self {
                action: "Install DSI Studio".into(),
                steps: vec![
                    "DSI Studio performs GQI reconstruction, tracking and connectivity".into(),
                    "Download a release and put the dsi_studio binary on your PATH".into(),
                ],
                commands: vec![
                    "# Or point reconflow at an existing binary:".into(),
                    "[tools]".into(),
                    "dsi_studio = \"/opt/dsi-studio/dsi_studio\"".into(),
                ],
            },
            "dwi2response" | "dwi2fod" | "mtnormalise" | "tckgen" | "tcksift2"
            | "tck2connectome" | "tckglobal" => Self {
                action: "Install MRtrix3".into(),
                steps: vec![
                    format!("'{}' ships with MRtrix3", tool),
                    "Choose an installation method below".into(),
                ],
                commands: vec![
                    "# Using conda:".into(),
                    "conda install -c mrtrix3 mrtrix3".into(),
                    "".into(),
                    "# Using Homebrew (macOS):".into(),
                    "brew install mrtrix3".into(),
                ],
            },
            _ => Self {
                action: format!("Install {}", tool),
                steps: vec![format!("Install {} and ensure it's in your PATH", tool)],
                commands: vec![],
            },
        }
    }

    /// Suggest fixing a dependency cycle
    pub fn fix_cycle(nodes: &[String]) -> Self {
        Self {
            action: "Break the dependency cycle".into(),
            steps: vec![
                format!("Detected cycle: {}", nodes.join(" → ")),
                "Each node has exactly one input".into(),
                "Make one node in the cycle read from \"qsiprep\" instead".into(),
            ],
            commands: vec![
                "# Visualize your pipeline:".into(),
                "reconflow graph <pipeline> --format mermaid".into(),
            ],
        }
    }

    /// Suggest fixing an input that names no node
    pub fn fix_reference(node: &str, reference: &str) -> Self {
        Self {
            action: format!("Fix the input of node '{}'", node),
            steps: vec![
                format!("'{}' is not the name of any node in this pipeline", reference),
                "Check the spelling against the \"name\" fields".into(),
            ],
            commands: vec![],
        }
    }

    /// Suggest declaring atlases for a connectivity node
    pub fn add_atlases(node: &str) -> Self {
        Self {
            action: "Declare parcellation atlases".into(),
            steps: vec![
                format!("Node '{}' builds one matrix per atlas", node),
                "Add the atlases to the top-level list of the document".into(),
            ],
            commands: vec!["\"atlases\": [\"schaefer100\", \"aal116\"]".into()],
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}
