// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Backend adapters
//!
//! One adapter per toolkit turns a task instance into the external commands
//! that carry it out. Adapters only plan: they never touch the filesystem or
//! start processes.

mod amico;
mod dipy;
mod dsi_studio;
mod mrtrix;
mod pyafq;
mod utility;

pub use amico::AmicoAdapter;
pub use dipy::DipyAdapter;
pub use dsi_studio::DsiStudioAdapter;
pub use mrtrix::MrtrixAdapter;
pub use pyafq::PyAfqAdapter;
pub use utility::UtilityAdapter;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::errors::{ReconflowError, ReconflowResult};
use crate::params::ResolvedParams;
use crate::pipeline::{Node, PipelineSpec, Software, EXTERNAL_SOURCE};
use crate::plan::{Qualifier, TaskInputs};

/// One external command to run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Files the command must leave behind for the step to count as a success
    pub expected_outputs: Vec<PathBuf>,
    /// Combined stdout/stderr of the command
    pub log_path: PathBuf,
    /// `task:step`, used in logs and errors
    pub label: String,
}

impl InvocationSpec {
    /// Shell-like rendering for display
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|a| {
                if a.contains(' ') {
                    format!("'{}'", a)
                } else {
                    a.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Program names, with overrides from the engine configuration
#[derive(Debug, Clone, Default)]
pub struct ToolPaths {
    overrides: BTreeMap<String, String>,
}

impl ToolPaths {
    pub fn new(overrides: BTreeMap<String, String>) -> Self {
        Self { overrides }
    }

    /// Configured program for a tool, or the tool name itself
    pub fn program(&self, tool: &str) -> String {
        self.overrides
            .get(tool)
            .cloned()
            .unwrap_or_else(|| tool.to_string())
    }
}

/// Everything an adapter may look at when planning one task instance
pub struct PlanContext<'a> {
    pub node: &'a Node,
    pub params: &'a ResolvedParams,
    pub qualifier: Option<&'a Qualifier>,
    pub inputs: &'a TaskInputs,
    /// Artifact stem; outputs are `<stem>_<label>.<ext>`
    pub stem: &'a Path,
    pub task_label: &'a str,
    pub tools: &'a ToolPaths,
}

impl<'a> PlanContext<'a> {
    /// Path of one output artifact
    pub fn output(&self, label: &str, ext: &str) -> PathBuf {
        let mut name = OsString::from(self.stem.as_os_str());
        name.push(format!("_{}.{}", label, ext));
        PathBuf::from(name)
    }

    /// Directory holding this node's artifacts
    pub fn node_dir(&self) -> PathBuf {
        self.stem.parent().map(Path::to_path_buf).unwrap_or_default()
    }

    /// Build one invocation of this task
    pub fn invocation(
        &self,
        step: &str,
        tool: &str,
        args: Vec<String>,
        expected_outputs: Vec<PathBuf>,
    ) -> InvocationSpec {
        let stem_name = self
            .stem
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        InvocationSpec {
            program: self.tools.program(tool),
            args,
            working_dir: self.node_dir(),
            expected_outputs,
            log_path: self
                .node_dir()
                .join("logs")
                .join(format!("{}_{}.log", stem_name, step)),
            label: format!("{}:{}", self.task_label, step),
        }
    }

    /// Required upstream file, by file name suffix
    pub fn upstream(&self, suffix: &str, what: &str) -> ReconflowResult<&'a Path> {
        self.inputs
            .find(suffix)
            .ok_or_else(|| self.incompatible(what))
    }

    pub fn incompatible(&self, what: &str) -> ReconflowError {
        ReconflowError::IncompatibleInput {
            node: self.node.name.clone(),
            needs: what.to_string(),
            upstream: self
                .inputs
                .upstream_node
                .clone()
                .unwrap_or_else(|| EXTERNAL_SOURCE.to_string()),
        }
    }

    /// Atlas image of a connectivity instance
    pub fn atlas(&self) -> ReconflowResult<&'a Path> {
        self.inputs
            .atlas
            .as_deref()
            .ok_or_else(|| ReconflowError::MissingAtlases {
                node: self.node.name.clone(),
            })
    }

    pub fn domain_error(&self, key: &str, reason: impl Into<String>) -> ReconflowError {
        ReconflowError::ParameterDomain {
            node: self.node.name.clone(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Render a parameter value as a command-line argument
pub(crate) fn arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Array(items) => items.iter().map(arg).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Plans the commands for one toolkit
pub trait BackendAdapter: Send + Sync {
    fn software(&self) -> Software;

    /// Commands for one task instance, in the order they must run
    fn plan(&self, ctx: &PlanContext<'_>) -> ReconflowResult<Vec<InvocationSpec>>;

    /// Tools an action needs, before `[tools]` overrides
    fn tools(&self, action: &str) -> Vec<&'static str>;
}

/// Adapters keyed by toolkit
pub struct AdapterRegistry {
    adapters: HashMap<Software, Box<dyn BackendAdapter>>,
}

impl AdapterRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry with an adapter for every built-in toolkit
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(DsiStudioAdapter));
        registry.register(Box::new(MrtrixAdapter));
        registry.register(Box::new(DipyAdapter));
        registry.register(Box::new(AmicoAdapter));
        registry.register(Box::new(PyAfqAdapter));
        registry.register(Box::new(UtilityAdapter));
        registry
    }

    pub fn register(&mut self, adapter: Box<dyn BackendAdapter>) {
        self.adapters.insert(adapter.software(), adapter);
    }

    pub fn get(&self, software: Software) -> Option<&dyn BackendAdapter> {
        self.adapters.get(&software).map(|a| a.as_ref())
    }

    /// Tools the pipeline needs that cannot be found on `PATH`
    pub fn missing_tools(&self, spec: &PipelineSpec, tools: &ToolPaths) -> Vec<ReconflowError> {
        let needed: BTreeSet<&'static str> = spec
            .nodes
            .iter()
            .filter_map(|node| {
                self.get(node.software)
                    .map(|adapter| adapter.tools(&node.action))
            })
            .flatten()
            .collect();

        needed
            .into_iter()
            .filter(|tool| which::which(tools.program(tool)).is_err())
            .map(ReconflowError::tool_not_found)
            .collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
