// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Pipeline definition structures
//!
//! The validated, immutable form of a pipeline document. Values of these
//! types are only produced by [`crate::pipeline::SchemaValidator`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Input token naming the preprocessed data supplied from outside the graph
pub const EXTERNAL_SOURCE: &str = "qsiprep";

/// A validated pipeline document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Pipeline name
    pub name: String,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Output space of the preprocessed data (e.g. `T1w`)
    pub space: String,

    /// Parcellation schemes available to connectivity nodes, in declaration order
    #[serde(default)]
    pub atlases: Vec<String>,

    /// Extra anatomical derivatives the pipeline expects
    #[serde(default)]
    pub anatomical: Vec<String>,

    /// Processing nodes in declaration order
    pub nodes: Vec<Node>,
}

impl PipelineSpec {
    /// Distinct toolkits used by this pipeline, in first-use order
    pub fn software(&self) -> Vec<Software> {
        let mut seen = Vec::new();
        for node in &self.nodes {
            if !seen.contains(&node.software) {
                seen.push(node.software);
            }
        }
        seen
    }
}

/// A single processing step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Node name (unique within the pipeline)
    pub name: String,

    /// Toolkit performing the action
    pub software: Software,

    /// Operation identifier, scoped by software
    pub action: String,

    /// Suffix used when naming this node's artifacts
    pub output_suffix: String,

    /// Where this node reads its input from
    pub input: NodeRef,

    /// Raw action parameters, validated by the parameter resolver
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Node {
    /// Name of the upstream node, if any
    pub fn parent(&self) -> Option<&str> {
        self.input.node_name()
    }

    /// `software:action` key used for timeouts and logging
    pub fn action_key(&self) -> String {
        format!("{}:{}", self.software, self.action)
    }
}

/// Reference to a node's single input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeRef {
    /// The pipeline's external input
    ExternalSource,
    /// Another node in the same pipeline
    NodeName(String),
}

impl NodeRef {
    /// Name of the referenced node (None for the external source)
    pub fn node_name(&self) -> Option<&str> {
        match self {
            Self::ExternalSource => None,
            Self::NodeName(name) => Some(name),
        }
    }
}

impl From<String> for NodeRef {
    fn from(s: String) -> Self {
        if s == EXTERNAL_SOURCE {
            Self::ExternalSource
        } else {
            Self::NodeName(s)
        }
    }
}

impl From<NodeRef> for String {
    fn from(r: NodeRef) -> Self {
        match r {
            NodeRef::ExternalSource => EXTERNAL_SOURCE.to_string(),
            NodeRef::NodeName(name) => name,
        }
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExternalSource => write!(f, "{}", EXTERNAL_SOURCE),
            Self::NodeName(name) => write!(f, "{}", name),
        }
    }
}

/// Backend toolkits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Software {
    #[serde(rename = "DSI Studio")]
    DsiStudio,
    #[serde(rename = "MRTrix3")]
    Mrtrix3,
    #[serde(rename = "Dipy")]
    Dipy,
    #[serde(rename = "AMICO")]
    Amico,
    #[serde(rename = "pyAFQ")]
    PyAfq,
    #[serde(rename = "qsiprep")]
    Qsiprep,
}

impl Software {
    /// Every known toolkit
    pub const ALL: [Software; 6] = [
        Self::DsiStudio,
        Self::Mrtrix3,
        Self::Dipy,
        Self::Amico,
        Self::PyAfq,
        Self::Qsiprep,
    ];

    /// Name as written in pipeline documents
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::DsiStudio => "DSI Studio",
            Self::Mrtrix3 => "MRTrix3",
            Self::Dipy => "Dipy",
            Self::Amico => "AMICO",
            Self::PyAfq => "pyAFQ",
            Self::Qsiprep => "qsiprep",
        }
    }

    /// Parse a document value
    pub fn from_wire(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|sw| sw.wire_name() == s)
    }

    /// Lower-case key used in engine configuration tables
    pub fn config_key(self) -> &'static str {
        match self {
            Self::DsiStudio => "dsi_studio",
            Self::Mrtrix3 => "mrtrix3",
            Self::Dipy => "dipy",
            Self::Amico => "amico",
            Self::PyAfq => "pyafq",
            Self::Qsiprep => "qsiprep",
        }
    }

    /// Parse either the document name or the configuration key
    pub fn parse_loose(s: &str) -> Option<Self> {
        Self::from_wire(s).or_else(|| Self::ALL.into_iter().find(|sw| sw.config_key() == s))
    }
}

impl std::fmt::Display for Software {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}
