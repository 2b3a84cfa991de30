// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Error types
//!
//! Every failure reconflow can report, from malformed pipeline documents to
//! backend processes that exit non-zero. Validation-class errors are detected
//! at load time and reported together through [`ReconflowError::Validation`];
//! execution-class errors belong to a single task instance.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for reconflow operations
pub type ReconflowResult<T> = Result<T, ReconflowError>;

/// How a backend process failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFailure {
    /// The program could not be started
    Spawn,
    /// The program exited with a non-zero status
    NonZeroExit,
    /// The program exited cleanly without writing a declared output
    MissingOutput,
    /// The process could not be supervised to completion
    Internal,
}

/// Main error type for reconflow
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum ReconflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Validation Errors (load time)
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline validation failed with {} error(s)", .errors.len())]
    #[diagnostic(
        code(reconflow::validation),
        help("Every problem found in the document is listed below; fix them all before re-running")
    )]
    Validation {
        #[related]
        errors: Vec<ReconflowError>,
    },

    #[error("{location}: {message}")]
    #[diagnostic(code(reconflow::schema))]
    SchemaValidation { location: String, message: String },

    #[error("Node name '{name}' is declared more than once (nodes {})", format_positions(.positions))]
    #[diagnostic(
        code(reconflow::duplicate_node_name),
        help("Node names must be unique within a pipeline")
    )]
    DuplicateNodeName { name: String, positions: Vec<usize> },

    #[error("Node '{node}' takes its input from unknown node '{reference}'")]
    #[diagnostic(
        code(reconflow::unresolved_reference),
        help("Use the name of another node in this pipeline, or \"qsiprep\" for the preprocessed input")
    )]
    UnresolvedReference { node: String, reference: String },

    #[error("Nodes form a dependency cycle: {}", .nodes.join(" → "))]
    #[diagnostic(
        code(reconflow::graph_cycle),
        help("Every chain of inputs must end at the external \"qsiprep\" input")
    )]
    GraphCycle { nodes: Vec<String> },

    #[error("Node '{node}': {software} has no action '{action}'")]
    #[diagnostic(code(reconflow::unsupported_action))]
    UnsupportedAction {
        node: String,
        software: String,
        action: String,
        #[help]
        help: Option<String>,
    },

    #[error("Node '{node}': parameter '{key}' is not recognized by {software} {action}")]
    #[diagnostic(code(reconflow::unsupported_parameter))]
    UnsupportedParameter {
        node: String,
        key: String,
        software: String,
        action: String,
    },

    #[error("Node '{node}': parameter '{key}' {reason}")]
    #[diagnostic(code(reconflow::parameter_domain))]
    ParameterDomain {
        node: String,
        key: String,
        reason: String,
    },

    #[error("Node '{node}' builds connectivity matrices but the pipeline declares no atlases")]
    #[diagnostic(
        code(reconflow::missing_atlases),
        help("Add at least one parcellation to the top-level \"atlases\" list")
    )]
    MissingAtlases { node: String },

    #[error("Node '{node}' needs {needs} from '{upstream}', which does not produce one")]
    #[diagnostic(
        code(reconflow::incompatible_input),
        help("Take the input from a node whose action produces that kind of file")
    )]
    IncompatibleInput {
        node: String,
        needs: String,
        upstream: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors (per task instance)
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Task '{task}' failed: {reason}")]
    #[diagnostic(code(reconflow::backend_execution))]
    BackendExecution {
        task: String,
        kind: BackendFailure,
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Task '{task}' timed out after {seconds}s")]
    #[diagnostic(
        code(reconflow::timeout),
        help("Raise the limit with --timeout SOFTWARE:ACTION=SECONDS or in the engine config")
    )]
    Timeout { task: String, seconds: u64 },

    #[error("Task '{task}' was cancelled because '{ancestor}' did not succeed")]
    #[diagnostic(code(reconflow::dependency_failed))]
    DependencyFailed { task: String, ancestor: String },

    #[error("Task '{task}' was cancelled by the operator")]
    #[diagnostic(code(reconflow::aborted))]
    Aborted { task: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Input Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline '{name}' is neither a file nor a prepackaged pipeline")]
    #[diagnostic(code(reconflow::pipeline_not_found), help("Prepackaged pipelines: {available}"))]
    PipelineNotFound { name: String, available: String },

    #[error("No input files matched pattern: {pattern}")]
    #[diagnostic(
        code(reconflow::no_input_files),
        help("The input root must contain one preprocessed DWI series in the pipeline's space")
    )]
    NoInputFiles { pattern: String },

    #[error("{} DWI series matched pattern: {pattern}", .matches.len())]
    #[diagnostic(
        code(reconflow::ambiguous_input),
        help("Point --input-root at a directory holding a single series")
    )]
    AmbiguousInput {
        pattern: String,
        matches: Vec<PathBuf>,
    },

    #[error("Toolkit '{tool}' not found")]
    #[diagnostic(code(reconflow::tool_not_found), help("{suggestion}"))]
    ToolNotFound { tool: String, suggestion: String },

    // ─────────────────────────────────────────────────────────────────────────
    // File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(reconflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(reconflow::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    #[error("Completion record error: {message}")]
    #[diagnostic(code(reconflow::record_error))]
    RecordError { message: String },

    #[error("Invalid engine configuration: {message}")]
    #[diagnostic(code(reconflow::config))]
    Config { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(reconflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(reconflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(reconflow::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(reconflow::toml_error))]
    Toml { message: String },

    #[error("Glob pattern error: {message}")]
    #[diagnostic(code(reconflow::glob_error))]
    GlobPattern { message: String },
}

fn format_positions(positions: &[usize]) -> String {
    positions
        .iter()
        .map(|p| format!("#{}", p + 1))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<std::io::Error> for ReconflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for ReconflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for ReconflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for ReconflowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl From<glob::PatternError> for ReconflowError {
    fn from(e: glob::PatternError) -> Self {
        Self::GlobPattern { message: e.to_string() }
    }
}

impl ReconflowError {
    /// Wrap collected load-time errors, or pass a lone error through unchanged
    pub fn validation(mut errors: Vec<ReconflowError>) -> Self {
        if errors.len() == 1 {
            return errors.remove(0);
        }
        Self::Validation { errors }
    }

    /// Name of this error in the engine's error taxonomy
    pub fn taxonomy(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::SchemaValidation { .. } => "SchemaValidationError",
            Self::DuplicateNodeName { .. } => "DuplicateNodeNameError",
            Self::UnresolvedReference { .. } => "UnresolvedReferenceError",
            Self::IncompatibleInput { .. } => "IncompatibleInputError",
            Self::GraphCycle { .. } => "GraphCycleError",
            Self::UnsupportedAction { .. } => "UnsupportedActionError",
            Self::UnsupportedParameter { .. } => "UnsupportedParameterError",
            Self::ParameterDomain { .. } | Self::MissingAtlases { .. } => "ParameterDomainError",
            Self::BackendExecution { .. } => "BackendExecutionError",
            Self::Timeout { .. } => "TimeoutError",
            Self::DependencyFailed { .. } => "DependencyFailedError",
            Self::Aborted { .. } => "AbortedError",
            _ => "EngineError",
        }
    }

    /// Failure kind of a backend execution error
    pub fn backend_failure(&self) -> Option<BackendFailure> {
        match self {
            Self::BackendExecution { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Flatten an aggregated validation error into its members
    pub fn into_errors(self) -> Vec<ReconflowError> {
        match self {
            Self::Validation { errors } => errors,
            other => vec![other],
        }
    }

    /// Create a toolkit not found error with installation suggestion
    pub fn tool_not_found(tool: &str) -> Self {
        let suggestion = match tool {
            "dsi_studio" => "Install DSI Studio: https://dsi-studio.labsolver.org/download.html".to_string(),
            "tckgen" | "dwi2fod" | "dwi2response" | "tck2connectome" => {
                "Install MRtrix3: https://www.mrtrix.org/download/".to_string()
            }
            "pyAFQ" => "Install pyAFQ: pip install pyAFQ".to_string(),
            _ => format!("Install {} and ensure it's in your PATH", tool),
        };

        Self::ToolNotFound {
            tool: tool.to_string(),
            suggestion,
        }
    }

    /// Create a backend failure with a hint drawn from the process log
    pub fn backend_failed_with_help(
        task: &str,
        kind: BackendFailure,
        reason: String,
        log_tail: &str,
    ) -> Self {
        Self::BackendExecution {
            task: task.to_string(),
            kind,
            reason,
            help: Self::help_for_log(log_tail),
        }
    }

    fn help_for_log(log_tail: &str) -> Option<String> {
        if log_tail.contains("No space left on device") {
            Some("The output volume is full. Free space or choose another --output-root.".into())
        } else if log_tail.contains("command not found") || log_tail.contains("not recognized") {
            Some("The toolkit executable is missing. Check the [tools] table of the engine config.".into())
        } else if log_tail.contains("Killed") || log_tail.contains("std::bad_alloc") {
            Some("The process ran out of memory. Lower --workers to leave more memory per task.".into())
        } else if log_tail.trim().is_empty() {
            None
        } else {
            Some(format!("Last log lines:\n{}", log_tail.trim_end()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_keeps_every_error() {
        let err = ReconflowError::validation(vec![
            ReconflowError::DuplicateNodeName {
                name: "csd".into(),
                positions: vec![0, 2],
            },
            ReconflowError::UnresolvedReference {
                node: "conn".into(),
                reference: "trk".into(),
            },
        ]);

        assert!(err.to_string().contains("2 error(s)"));
        assert_eq!(err.into_errors().len(), 2);
    }

    #[test]
    fn test_single_validation_error_is_unwrapped() {
        let err = ReconflowError::validation(vec![ReconflowError::MissingAtlases {
            node: "conn".into(),
        }]);
        assert!(matches!(err, ReconflowError::MissingAtlases { .. }));
    }

    #[test]
    fn test_duplicate_positions_are_one_based() {
        let err = ReconflowError::DuplicateNodeName {
            name: "csd".into(),
            positions: vec![0, 3],
        };
        assert_eq!(
            err.to_string(),
            "Node name 'csd' is declared more than once (nodes #1, #4)"
        );
    }

    #[test]
    fn test_taxonomy_names() {
        let err = ReconflowError::Timeout {
            task: "trk".into(),
            seconds: 10,
        };
        assert_eq!(err.taxonomy(), "TimeoutError");

        let err = ReconflowError::DependencyFailed {
            task: "conn".into(),
            ancestor: "trk".into(),
        };
        assert_eq!(err.taxonomy(), "DependencyFailedError");

        let err = ReconflowError::Aborted { task: "conn".into() };
        assert_eq!(err.taxonomy(), "AbortedError");
        assert_eq!(err.backend_failure(), None);

        let err = ReconflowError::IncompatibleInput {
            node: "conn".into(),
            needs: "a streamline file".into(),
            upstream: "recon".into(),
        };
        assert_eq!(err.taxonomy(), "IncompatibleInputError");
    }

    #[test]
    fn test_backend_help_mentions_memory() {
        let err = ReconflowError::backend_failed_with_help(
            "trk",
            BackendFailure::NonZeroExit,
            "exit status 137".into(),
            "Killed\n",
        );
        assert_eq!(err.backend_failure(), Some(BackendFailure::NonZeroExit));
        match err {
            ReconflowError::BackendExecution { help: Some(help), .. } => {
                assert!(help.contains("memory"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
