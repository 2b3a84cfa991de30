// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Pipeline documents
//!
//! Loads raw pipeline documents from disk or from the prepackaged set and
//! applies the document-level rewrites (sloppy mode, skipping ODF plots)
//! before validation.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::{ReconflowError, ReconflowResult};
use crate::params::SchemaRegistry;
use crate::pipeline::Software;

/// Pipelines bundled with reconflow, by name
const PREPACKAGED: &[(&str, &str)] = &[
    (
        "amico_noddi",
        include_str!("../../pipelines/amico_noddi.json"),
    ),
    (
        "dipy_3dshore",
        include_str!("../../pipelines/dipy_3dshore.json"),
    ),
    (
        "dipy_mapmri",
        include_str!("../../pipelines/dipy_mapmri.json"),
    ),
    (
        "dsi_studio_gqi",
        include_str!("../../pipelines/dsi_studio_gqi.json"),
    ),
    (
        "mrtrix_multishell_msmt",
        include_str!("../../pipelines/mrtrix_multishell_msmt.json"),
    ),
    (
        "mrtrix_singleshell_ss3t",
        include_str!("../../pipelines/mrtrix_singleshell_ss3t.json"),
    ),
    (
        "pyafq_tractometry",
        include_str!("../../pipelines/pyafq_tractometry.json"),
    ),
];

/// Names of the prepackaged pipelines
pub fn prepackaged_names() -> Vec<&'static str> {
    PREPACKAGED.iter().map(|(name, _)| *name).collect()
}

/// Where a document came from
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentSource {
    File(PathBuf),
    Prepackaged(&'static str),
    Inline,
}

impl std::fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Prepackaged(name) => write!(f, "{} (prepackaged)", name),
            Self::Inline => write!(f, "<inline>"),
        }
    }
}

/// A raw, not yet validated pipeline document
#[derive(Debug, Clone)]
pub struct PipelineDocument {
    pub source: DocumentSource,
    pub value: Value,
}

impl PipelineDocument {
    /// Wrap an already parsed document
    pub fn from_value(value: Value) -> Self {
        Self {
            source: DocumentSource::Inline,
            value,
        }
    }

    /// Load a document from disk; `.json` files are read as JSON, anything
    /// else as YAML
    pub fn from_path(path: &Path) -> ReconflowResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ReconflowError::FileReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let value = if is_json {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        Ok(Self {
            source: DocumentSource::File(path.to_path_buf()),
            value,
        })
    }

    /// Load a prepackaged pipeline by name
    pub fn prepackaged(name: &str) -> ReconflowResult<Self> {
        let (name, text) = PREPACKAGED
            .iter()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| ReconflowError::PipelineNotFound {
                name: name.to_string(),
                available: prepackaged_names().join(", "),
            })?;

        Ok(Self {
            source: DocumentSource::Prepackaged(name),
            value: serde_json::from_str(text)?,
        })
    }

    /// Load a file if one exists at `name_or_path`, else a prepackaged pipeline
    pub fn resolve(name_or_path: &str) -> ReconflowResult<Self> {
        let path = Path::new(name_or_path);
        if path.is_file() {
            debug!("Loading pipeline document {}", path.display());
            return Self::from_path(path);
        }
        Self::prepackaged(name_or_path)
    }

    /// Declared pipeline name, if present
    pub fn name(&self) -> Option<&str> {
        self.value.get("name").and_then(Value::as_str)
    }

    /// Force unrealistically cheap settings on the expensive steps.
    ///
    /// Returns the number of nodes rewritten.
    pub fn make_sloppy(&mut self) -> usize {
        warn!("Forcing reconstruction to use unrealistic parameters");

        let mut changed = 0;
        for node in self.nodes_mut() {
            let software = node_software(node);
            let action = node.get("action").and_then(Value::as_str).unwrap_or_default();

            let rewrite: Option<(&[&str], Value)> = match (software, action) {
                (Some(Software::Mrtrix3), "tractography") => {
                    Some((&["tckgen", "select"][..], Value::from(1000)))
                }
                (Some(Software::Mrtrix3), "global_tractography") => {
                    Some((&["tckglobal", "niter"][..], Value::from(100_000)))
                }
                (Some(Software::DsiStudio), "tractography") => {
                    Some((&["fiber_count"][..], Value::from(5000)))
                }
                (Some(Software::DsiStudio), "autotrack") => {
                    Some((&["track_voxel_ratio"][..], Value::from(0.5)))
                }
                (Some(Software::PyAfq), _) => Some((&["clean_rounds"][..], Value::from(1))),
                _ => None,
            };

            if let Some((path, value)) = rewrite {
                if set_parameter(node, path, value) {
                    changed += 1;
                }
            }
        }

        changed
    }

    /// Turn off ODF plotting on every node whose action has a `plot_reports`
    /// switch. Returns the number of nodes rewritten.
    pub fn skip_odf_plots(&mut self, registry: &SchemaRegistry) -> usize {
        let mut changed = 0;
        for node in self.nodes_mut() {
            let Some(software) = node_software(node) else {
                continue;
            };
            let action = node.get("action").and_then(Value::as_str).unwrap_or_default();

            let knows_plots = registry
                .lookup(software, action)
                .is_some_and(|schema| schema.accepts("plot_reports"));

            if knows_plots && set_parameter(node, &["plot_reports"], Value::Bool(false)) {
                changed += 1;
            }
        }
        changed
    }

    fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Map<String, Value>> {
        self.value
            .get_mut("nodes")
            .and_then(Value::as_array_mut)
            .into_iter()
            .flatten()
            .filter_map(Value::as_object_mut)
    }
}

fn node_software(node: &Map<String, Value>) -> Option<Software> {
    node.get("software")
        .and_then(Value::as_str)
        .and_then(Software::from_wire)
}

/// Set `parameters.<path>` on a raw node, creating intermediate objects.
/// Leaves malformed nodes alone for the validator to report.
fn set_parameter(node: &mut Map<String, Value>, path: &[&str], value: Value) -> bool {
    let mut current = node
        .entry("parameters")
        .or_insert_with(|| Value::Object(Map::new()));

    let Some((last, parents)) = path.split_last() else {
        return false;
    };

    for key in parents {
        let Some(obj) = current.as_object_mut() else {
            return false;
        };
        current = obj
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    match current.as_object_mut() {
        Some(obj) => {
            obj.insert(last.to_string(), value);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_every_prepackaged_pipeline_parses() {
        for name in prepackaged_names() {
            let doc = PipelineDocument::prepackaged(name).unwrap();
            assert_eq!(doc.name(), Some(name), "pipeline file {name} declares another name");
        }
    }

    #[test]
    fn test_unknown_prepackaged_name() {
        let err = PipelineDocument::resolve("no_such_pipeline").unwrap_err();
        match err {
            ReconflowError::PipelineNotFound { available, .. } => {
                assert!(available.contains("mrtrix_multishell_msmt"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_yaml_and_json_files() {
        let temp = TempDir::new().unwrap();

        let yaml = temp.path().join("p.yaml");
        std::fs::write(
            &yaml,
            "name: p\nspace: T1w\nnodes:\n  - name: trk\n    parameters:\n      select: 1e7\n",
        )
        .unwrap();
        let doc = PipelineDocument::resolve(yaml.to_str().unwrap()).unwrap();
        assert_eq!(doc.value["nodes"][0]["parameters"]["select"].as_f64(), Some(1e7));

        let json_path = temp.path().join("p.json");
        std::fs::write(&json_path, r#"{"name": "q", "space": "T1w", "nodes": []}"#).unwrap();
        let doc = PipelineDocument::from_path(&json_path).unwrap();
        assert_eq!(doc.name(), Some("q"));
        assert_eq!(doc.source, DocumentSource::File(json_path));
    }

    #[test]
    fn test_skip_odf_plots_only_touches_nodes_that_plot() {
        let registry = SchemaRegistry::builtin();
        let mut doc = PipelineDocument::from_value(json!({
            "nodes": [
                {"software": "MRTrix3", "action": "csd"},
                {"software": "MRTrix3", "action": "tractography", "parameters": {"use_5tt": true}},
                {"software": "Dipy", "action": "MAPMRI_reconstruction", "parameters": {}}
            ]
        }));

        assert_eq!(doc.skip_odf_plots(&registry), 2);
        assert_eq!(doc.value["nodes"][0]["parameters"]["plot_reports"], json!(false));
        assert!(doc.value["nodes"][1]["parameters"].get("plot_reports").is_none());
        assert_eq!(doc.value["nodes"][2]["parameters"]["plot_reports"], json!(false));
    }

    #[test]
    fn test_make_sloppy() {
        let mut doc = PipelineDocument::from_value(json!({
            "nodes": [
                {"software": "MRTrix3", "action": "tractography",
                 "parameters": {"tckgen": {"algorithm": "iFOD2", "select": 1e7}}},
                {"software": "MRTrix3", "action": "global_tractography"},
                {"software": "MRTrix3", "action": "csd", "parameters": {}}
            ]
        }));

        assert_eq!(doc.make_sloppy(), 2);
        assert_eq!(doc.value["nodes"][0]["parameters"]["tckgen"]["select"], json!(1000));
        assert_eq!(doc.value["nodes"][0]["parameters"]["tckgen"]["algorithm"], json!("iFOD2"));
        assert_eq!(doc.value["nodes"][1]["parameters"]["tckglobal"]["niter"], json!(100000));
    }
}
