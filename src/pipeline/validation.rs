// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Pipeline document validation
//!
//! Checks the raw document structure and produces the typed
//! [`PipelineSpec`]. Every problem is collected; a malformed node is left out
//! of the partial spec so later load stages can still inspect the rest.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::errors::ReconflowError;
use crate::params::SchemaRegistry;
use crate::pipeline::{Node, NodeRef, PipelineSpec, Software, EXTERNAL_SOURCE};

const TOP_LEVEL_KEYS: &[&str] = &["name", "description", "space", "atlases", "anatomical", "nodes"];
const NODE_KEYS: &[&str] = &["name", "software", "action", "output_suffix", "input", "parameters"];

/// Identifiers that end up inside artifact names (atlases, measures, suffixes)
pub fn is_qualifier_safe(s: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_.+]+$").expect("Invalid qualifier pattern"))
        .is_match(s)
}

/// Node names; `-` is allowed since the name only forms a directory
pub fn is_valid_node_name(s: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_.+-]+$").expect("Invalid node name pattern"))
        .is_match(s)
}

/// Result of structural validation
#[derive(Debug)]
pub struct SchemaOutcome {
    /// The typed document, absent when the top level itself is unusable
    pub spec: Option<PipelineSpec>,
    /// Every problem found, in document order
    pub errors: Vec<ReconflowError>,
    /// Whether every declared node made it into `spec`
    pub all_nodes_valid: bool,
    /// Every node name the document declares, including nodes left out of `spec`
    pub declared_names: HashSet<String>,
}

/// Validates raw pipeline documents
pub struct SchemaValidator<'r> {
    registry: &'r SchemaRegistry,
}

impl<'r> SchemaValidator<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Validate a document, returning the spec only when it is entirely clean
    pub fn validate(&self, doc: &Value) -> Result<PipelineSpec, Vec<ReconflowError>> {
        let outcome = self.check(doc);
        match outcome.spec {
            Some(spec) if outcome.errors.is_empty() => Ok(spec),
            _ => Err(outcome.errors),
        }
    }

    /// Validate a document, keeping whatever part of it is well-formed
    pub fn check(&self, doc: &Value) -> SchemaOutcome {
        let mut errors = Vec::new();

        let Some(top) = doc.as_object() else {
            errors.push(schema_error("document", "must be an object"));
            return SchemaOutcome {
                spec: None,
                errors,
                all_nodes_valid: false,
                declared_names: HashSet::new(),
            };
        };

        for key in top.keys() {
            if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
                errors.push(schema_error("document", format!("unknown key '{}'", key)));
            }
        }

        let name = required_string(top, "name", "document", &mut errors);
        let description = top.get("description").and_then(Value::as_str).map(String::from);

        let space = required_string(top, "space", "document", &mut errors);
        if let Some(space) = &space {
            if !is_qualifier_safe(space) {
                errors.push(schema_error(
                    "space",
                    format!("'{}' must only use letters, digits, '_', '.' or '+'", space),
                ));
            }
        }

        let atlases = self.check_atlases(top.get("atlases"), &mut errors);
        let anatomical = string_list(top.get("anatomical"), "anatomical", &mut errors);

        let (nodes, all_nodes_valid, declared_names) = match top.get("nodes") {
            None => {
                errors.push(schema_error("document", "missing required field 'nodes'"));
                (Vec::new(), false, HashSet::new())
            }
            Some(Value::Array(raw)) if raw.is_empty() => {
                errors.push(schema_error("nodes", "must declare at least one node"));
                (Vec::new(), false, HashSet::new())
            }
            Some(Value::Array(raw)) => self.check_nodes(raw, &mut errors),
            Some(other) => {
                errors.push(schema_error("nodes", format!("must be an array (got {})", other)));
                (Vec::new(), false, HashSet::new())
            }
        };

        let spec = match (name, space) {
            (Some(name), Some(space)) => Some(PipelineSpec {
                name,
                description,
                space,
                atlases,
                anatomical,
                nodes,
            }),
            _ => None,
        };

        SchemaOutcome {
            spec,
            errors,
            all_nodes_valid,
            declared_names,
        }
    }

    fn check_atlases(&self, value: Option<&Value>, errors: &mut Vec<ReconflowError>) -> Vec<String> {
        let atlases = string_list(value, "atlases", errors);
        let mut seen = HashSet::new();

        for atlas in &atlases {
            if !is_qualifier_safe(atlas) {
                errors.push(schema_error(
                    "atlases",
                    format!("'{}' must only use letters, digits, '_', '.' or '+'", atlas),
                ));
            } else if !seen.insert(atlas.as_str()) {
                errors.push(schema_error("atlases", format!("'{}' is listed twice", atlas)));
            }
        }

        atlases
    }

    fn check_nodes(
        &self,
        raw: &[Value],
        errors: &mut Vec<ReconflowError>,
    ) -> (Vec<Node>, bool, HashSet<String>) {
        let mut nodes = Vec::with_capacity(raw.len());
        let mut positions: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut first_seen = Vec::new();

        for (index, value) in raw.iter().enumerate() {
            let declared_name = value.get("name").and_then(Value::as_str);
            if let Some(name) = declared_name {
                let entry = positions.entry(name.to_string()).or_default();
                if entry.is_empty() {
                    first_seen.push(name.to_string());
                }
                entry.push(index);
            }

            if let Some(node) = self.check_node(index, value, errors) {
                nodes.push(node);
            }
        }

        let mut has_duplicates = false;
        for name in first_seen {
            let at = &positions[&name];
            if at.len() > 1 {
                has_duplicates = true;
                errors.push(ReconflowError::DuplicateNodeName {
                    name,
                    positions: at.clone(),
                });
            }
        }

        let all_valid = nodes.len() == raw.len() && !has_duplicates;
        (nodes, all_valid, positions.into_keys().collect())
    }

    fn check_node(
        &self,
        index: usize,
        value: &Value,
        errors: &mut Vec<ReconflowError>,
    ) -> Option<Node> {
        let Some(obj) = value.as_object() else {
            errors.push(schema_error(format!("nodes[{}]", index), "must be an object"));
            return None;
        };

        let location = match obj.get("name").and_then(Value::as_str) {
            Some(name) => format!("nodes[{}] ({})", index, name),
            None => format!("nodes[{}]", index),
        };
        let before = errors.len();

        for key in obj.keys() {
            if !NODE_KEYS.contains(&key.as_str()) {
                errors.push(schema_error(&location, format!("unknown key '{}'", key)));
            }
        }

        let name = required_string(obj, "name", &location, errors);
        if let Some(name) = &name {
            if name == EXTERNAL_SOURCE {
                errors.push(schema_error(
                    &location,
                    format!("'{}' is reserved for the external input", EXTERNAL_SOURCE),
                ));
            } else if !is_valid_node_name(name) {
                errors.push(schema_error(
                    &location,
                    "name must only use letters, digits, '_', '.', '+' or '-'",
                ));
            }
        }

        let software = required_string(obj, "software", &location, errors).and_then(|s| {
            let parsed = Software::from_wire(&s);
            if parsed.is_none() {
                let known: Vec<_> = Software::ALL.iter().map(|sw| sw.wire_name()).collect();
                errors.push(schema_error(
                    &location,
                    format!("unknown software '{}' (expected one of: {})", s, known.join(", ")),
                ));
            }
            parsed
        });

        let action = required_string(obj, "action", &location, errors);

        let output_suffix = required_string(obj, "output_suffix", &location, errors);
        if let Some(suffix) = &output_suffix {
            if !is_qualifier_safe(suffix) {
                errors.push(schema_error(
                    &location,
                    "output_suffix must only use letters, digits, '_', '.' or '+'",
                ));
            }
        }

        let input = required_string(obj, "input", &location, errors);

        let parameters = match obj.get("parameters") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                errors.push(schema_error(
                    &location,
                    format!("parameters must be an object (got {})", other),
                ));
                Map::new()
            }
        };

        if let (Some(name), Some(software), Some(action)) = (&name, software, &action) {
            if self.registry.lookup(software, action).is_none() {
                errors.push(ReconflowError::UnsupportedAction {
                    node: name.clone(),
                    software: software.to_string(),
                    action: action.clone(),
                    help: Some(format!(
                        "Actions available for {}: {}",
                        software,
                        self.registry.actions_for(software).join(", ")
                    )),
                });
            }
        }

        if errors.len() > before {
            return None;
        }

        Some(Node {
            name: name?,
            software: software?,
            action: action?,
            output_suffix: output_suffix?,
            input: NodeRef::from(input?),
            parameters,
        })
    }
}

fn schema_error(location: impl Into<String>, message: impl Into<String>) -> ReconflowError {
    ReconflowError::SchemaValidation {
        location: location.into(),
        message: message.into(),
    }
}

fn required_string(
    obj: &Map<String, Value>,
    key: &str,
    location: &str,
    errors: &mut Vec<ReconflowError>,
) -> Option<String> {
    match obj.get(key) {
        None => {
            errors.push(schema_error(location, format!("missing required field '{}'", key)));
            None
        }
        Some(Value::String(s)) if s.is_empty() => {
            errors.push(schema_error(location, format!("'{}' must not be empty", key)));
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            errors.push(schema_error(
                location,
                format!("'{}' must be a string (got {})", key, other),
            ));
            None
        }
    }
}

fn string_list(value: Option<&Value>, key: &str, errors: &mut Vec<ReconflowError>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| match item.as_str() {
                Some(s) => Some(s.to_string()),
                None => {
                    errors.push(schema_error(
                        format!("{}[{}]", key, i),
                        format!("must be a string (got {})", item),
                    ));
                    None
                }
            })
            .collect(),
        Some(other) => {
            errors.push(schema_error(key, format!("must be an array of strings (got {})", other)));
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn csd_node(name: &str, input: &str) -> Value {
        json!({
            "name": name,
            "software": "MRTrix3",
            "action": "csd",
            "output_suffix": "msmtcsd",
            "input": input,
            "parameters": {
                "response": {"algorithm": "dhollander"},
                "fod": {"algorithm": "msmt_csd"}
            }
        })
    }

    fn validate(doc: &Value) -> Result<PipelineSpec, Vec<ReconflowError>> {
        let registry = SchemaRegistry::builtin();
        SchemaValidator::new(&registry).validate(doc)
    }

    #[test]
    fn test_valid_document() {
        let doc = json!({
            "name": "msmt",
            "space": "T1w",
            "atlases": ["schaefer100", "aal116"],
            "nodes": [csd_node("csd", "qsiprep")]
        });

        let spec = validate(&doc).unwrap();
        assert_eq!(spec.name, "msmt");
        assert_eq!(spec.atlases, vec!["schaefer100", "aal116"]);
        assert!(spec.anatomical.is_empty());
        assert_eq!(spec.nodes[0].input, NodeRef::ExternalSource);
    }

    #[test]
    fn test_every_defect_is_reported() {
        let doc = json!({
            "name": "broken",
            "space": "T1w",
            "nodes": [
                {"name": "a", "software": "MRTrix3", "action": "csd", "input": "qsiprep"},
                {"name": "b", "software": "FSL", "action": "bedpostx", "output_suffix": "x", "input": "a"},
                {"name": "c", "software": "Dipy", "action": "nope", "output_suffix": "x", "input": "a"}
            ]
        });

        let errors = validate(&doc).unwrap_err();
        assert_eq!(errors.len(), 3, "{errors:#?}");
        assert!(errors[0].to_string().contains("output_suffix"));
        assert!(errors[1].to_string().contains("unknown software 'FSL'"));
        assert!(matches!(errors[2], ReconflowError::UnsupportedAction { .. }));
    }

    #[test]
    fn test_duplicate_names_reported_once_with_all_positions() {
        let doc = json!({
            "name": "dups",
            "space": "T1w",
            "nodes": [
                csd_node("csd", "qsiprep"),
                csd_node("other", "qsiprep"),
                csd_node("csd", "qsiprep"),
                csd_node("csd", "qsiprep")
            ]
        });

        let errors = validate(&doc).unwrap_err();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ReconflowError::DuplicateNodeName { name, positions } => {
                assert_eq!(name, "csd");
                assert_eq!(positions, &vec![0, 2, 3]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_reserved_node_name() {
        let doc = json!({
            "name": "p",
            "space": "T1w",
            "nodes": [csd_node("qsiprep", "qsiprep")]
        });
        let errors = validate(&doc).unwrap_err();
        assert!(errors[0].to_string().contains("reserved"));
    }

    #[test]
    fn test_atlas_names_must_be_unique_and_safe() {
        let doc = json!({
            "name": "p",
            "space": "T1w",
            "atlases": ["aal116", "aal116", "bad-name"],
            "nodes": [csd_node("csd", "qsiprep")]
        });
        let errors = validate(&doc).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_empty_and_missing_nodes() {
        let errors = validate(&json!({"name": "p", "space": "T1w", "nodes": []})).unwrap_err();
        assert!(errors[0].to_string().contains("at least one node"));

        let errors = validate(&json!({"name": "p", "space": "T1w"})).unwrap_err();
        assert!(errors[0].to_string().contains("'nodes'"));
    }

    #[test]
    fn test_partial_spec_keeps_valid_nodes() {
        let registry = SchemaRegistry::builtin();
        let doc = json!({
            "name": "p",
            "space": "T1w",
            "nodes": [csd_node("csd", "qsiprep"), {"name": "bad"}]
        });

        let outcome = SchemaValidator::new(&registry).check(&doc);
        let spec = outcome.spec.unwrap();
        assert_eq!(spec.nodes.len(), 1);
        assert_eq!(spec.nodes[0].name, "csd");
        assert!(!outcome.all_nodes_valid);
        assert!(outcome.declared_names.contains("bad"));
        assert!(!outcome.errors.is_empty());
    }

    #[test]
    fn test_identifier_patterns() {
        assert!(is_qualifier_safe("schaefer100x7"));
        assert!(is_qualifier_safe("radius2.count+weights"));
        assert!(!is_qualifier_safe("bad-name"));
        assert!(!is_qualifier_safe("a/b"));
        assert!(!is_qualifier_safe(""));
        assert!(is_valid_node_name("msmt-csd"));
        assert!(!is_valid_node_name("msmt csd"));
    }
}
