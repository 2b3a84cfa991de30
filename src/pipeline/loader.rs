// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Load-time validation
//!
//! Runs every validation stage over a document and reports all of their
//! errors together, so one pass over a broken pipeline shows everything
//! that needs fixing.

use tracing::debug;

use crate::errors::{ReconflowError, ReconflowResult};
use crate::params::{ActionSchema, ParameterResolver, ResolvedParams, SchemaRegistry};
use crate::pipeline::{Forest, Node, PipelineDocument, PipelineSpec, SchemaValidator};

/// A pipeline that passed every load-time check
#[derive(Debug, Clone)]
pub struct LoadedPipeline {
    pub spec: PipelineSpec,
    pub forest: Forest,
    /// Resolved parameters, by declaration index
    params: Vec<ResolvedParams>,
    /// Action schemas, by declaration index
    schemas: Vec<ActionSchema>,
}

impl LoadedPipeline {
    pub fn node(&self, idx: usize) -> &Node {
        &self.spec.nodes[idx]
    }

    pub fn params(&self, idx: usize) -> &ResolvedParams {
        &self.params[idx]
    }

    pub fn schema(&self, idx: usize) -> &ActionSchema {
        &self.schemas[idx]
    }

    /// Nodes in execution order with their declaration index
    pub fn nodes_in_order(&self) -> impl Iterator<Item = (usize, &Node)> {
        self.forest.order().iter().map(|&i| (i, &self.spec.nodes[i]))
    }
}

/// Loads documents against a schema registry
pub struct PipelineLoader<'r> {
    registry: &'r SchemaRegistry,
}

impl<'r> PipelineLoader<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Validate a document completely, collecting every load-time error
    pub fn load(&self, document: &PipelineDocument) -> ReconflowResult<LoadedPipeline> {
        let outcome = SchemaValidator::new(self.registry).check(&document.value);
        let mut errors = outcome.errors;

        let Some(spec) = outcome.spec else {
            return Err(ReconflowError::validation(errors));
        };

        // A forest is only built from a clean node list; otherwise the nodes
        // that did parse are still checked for references and cycles.
        let forest = if outcome.all_nodes_valid {
            match Forest::build(&spec) {
                Ok(forest) => Some(forest),
                Err(graph_errors) => {
                    errors.extend(graph_errors);
                    None
                }
            }
        } else {
            errors.extend(Forest::check_partial(&spec, &outcome.declared_names));
            None
        };

        let resolver = ParameterResolver::new(self.registry);
        let mut params = Vec::with_capacity(spec.nodes.len());
        let mut schemas = Vec::with_capacity(spec.nodes.len());

        for node in &spec.nodes {
            let Some(schema) = self.registry.lookup(node.software, &node.action) else {
                continue;
            };

            match resolver.resolve(node) {
                Ok(resolved) => params.push(resolved),
                Err(node_errors) => errors.extend(node_errors),
            }

            if schema.is_connectivity() && spec.atlases.is_empty() {
                errors.push(ReconflowError::MissingAtlases {
                    node: node.name.clone(),
                });
            }
            schemas.push(*schema);
        }

        match forest {
            Some(forest) if errors.is_empty() => {
                debug!(
                    "Loaded pipeline '{}' from {}: {} node(s) in {} tree(s)",
                    spec.name,
                    document.source,
                    spec.nodes.len(),
                    forest.tree_count()
                );
                Ok(LoadedPipeline {
                    spec,
                    forest,
                    params,
                    schemas,
                })
            }
            _ => Err(ReconflowError::validation(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::prepackaged_names;
    use serde_json::json;

    fn load(value: serde_json::Value) -> ReconflowResult<LoadedPipeline> {
        let registry = SchemaRegistry::builtin();
        PipelineLoader::new(&registry).load(&PipelineDocument::from_value(value))
    }

    #[test]
    fn test_every_prepackaged_pipeline_loads() {
        let registry = SchemaRegistry::builtin();
        let loader = PipelineLoader::new(&registry);
        for name in prepackaged_names() {
            let doc = PipelineDocument::prepackaged(name).unwrap();
            if let Err(e) = loader.load(&doc) {
                panic!("{name} failed to load: {e:?}");
            }
        }
    }

    #[test]
    fn test_errors_from_every_stage_are_collected() {
        let err = load(json!({
            "name": "broken",
            "space": "T1w",
            "nodes": [
                {"name": "csd", "software": "MRTrix3", "action": "csd", "output_suffix": "fod",
                 "input": "qsiprep", "parameters": {"response": {"algorithm": "dhollander"}}},
                {"name": "trk", "software": "MRTrix3", "action": "tractography", "output_suffix": "tck",
                 "input": "nowhere", "parameters": {"tckgen": {"algorithm": "iFOD2"}, "extra": 1}},
                {"name": "conn", "software": "DSI Studio", "action": "connectivity",
                 "output_suffix": "net", "input": "trk"}
            ]
        }))
        .unwrap_err();

        let errors = err.into_errors();
        let kinds: Vec<_> = errors.iter().map(|e| e.taxonomy()).collect();
        assert_eq!(
            kinds,
            vec![
                "UnresolvedReferenceError",
                "ParameterDomainError",
                "UnsupportedParameterError",
                "ParameterDomainError",
            ]
        );
        assert!(matches!(errors[3], ReconflowError::MissingAtlases { .. }));
    }

    #[test]
    fn test_duplicate_name_and_unresolved_reference_reported_together() {
        let err = load(json!({
            "name": "broken",
            "space": "T1w",
            "nodes": [
                {"name": "recon", "software": "DSI Studio", "action": "reconstruction",
                 "output_suffix": "gqi", "input": "qsiprep"},
                {"name": "recon", "software": "DSI Studio", "action": "reconstruction",
                 "output_suffix": "gqi2", "input": "qsiprep"},
                {"name": "trk", "software": "DSI Studio", "action": "tractography",
                 "output_suffix": "gqi", "input": "missing_node"}
            ]
        }))
        .unwrap_err();

        let kinds: Vec<_> = err.into_errors().iter().map(|e| e.taxonomy()).collect();
        assert_eq!(kinds, vec!["DuplicateNodeNameError", "UnresolvedReferenceError"]);
    }

    #[test]
    fn test_reference_to_malformed_node_is_not_unresolved() {
        let err = load(json!({
            "name": "broken",
            "space": "T1w",
            "nodes": [
                {"name": "recon", "software": "DSI Studio", "action": "reconstruction",
                 "input": "qsiprep"},
                {"name": "trk", "software": "DSI Studio", "action": "tractography",
                 "output_suffix": "gqi", "input": "recon"},
                {"name": "a", "software": "DSI Studio", "action": "tractography",
                 "output_suffix": "a", "input": "b"},
                {"name": "b", "software": "DSI Studio", "action": "tractography",
                 "output_suffix": "b", "input": "a"}
            ]
        }))
        .unwrap_err();

        let kinds: Vec<_> = err.into_errors().iter().map(|e| e.taxonomy()).collect();
        assert_eq!(kinds, vec!["SchemaValidationError", "GraphCycleError"]);
    }

    #[test]
    fn test_loaded_pipeline_exposes_resolved_params() {
        let loaded = load(json!({
            "name": "ok",
            "space": "T1w",
            "nodes": [
                {"name": "recon", "software": "DSI Studio", "action": "reconstruction",
                 "output_suffix": "gqi", "input": "qsiprep"},
                {"name": "trk", "software": "DSI Studio", "action": "tractography",
                 "output_suffix": "gqi", "input": "recon", "parameters": {"fiber_count": 1e6}}
            ]
        }))
        .unwrap();

        assert_eq!(loaded.params(1).i64("fiber_count"), Some(1_000_000));
        assert_eq!(loaded.params(0).str("method"), Some("gqi"));
        let order: Vec<_> = loaded.nodes_in_order().map(|(_, n)| n.name.as_str()).collect();
        assert_eq!(order, vec!["recon", "trk"]);
    }
}
