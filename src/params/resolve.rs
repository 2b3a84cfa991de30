// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Parameter resolution
//!
//! Validates a node's raw parameters against its action schema. All problems
//! in a node are collected; nothing is fail-fast.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::schema::{ActionSchema, ParamSpec, Shape, ValueKind};
use super::{measure_id, ResolvedParams, SchemaRegistry};
use crate::errors::ReconflowError;
use crate::pipeline::{is_qualifier_safe, Node};

/// Resolves node parameters against a [`SchemaRegistry`]
pub struct ParameterResolver<'r> {
    registry: &'r SchemaRegistry,
}

struct Scope<'a> {
    node: &'a Node,
    schema: &'a ActionSchema,
}

impl<'r> ParameterResolver<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Validate and normalize one node's parameters
    pub fn resolve(&self, node: &Node) -> Result<ResolvedParams, Vec<ReconflowError>> {
        let Some(schema) = self.registry.lookup(node.software, &node.action) else {
            return Err(vec![self.unsupported_action(node)]);
        };

        let scope = Scope { node, schema };
        let mut errors = Vec::new();

        let resolved = resolve_object(&scope, "", schema.params, &node.parameters, &mut errors);

        if let Some(key) = schema.measure_key {
            check_measures(&scope, key, &resolved, &mut errors);
        }

        if errors.is_empty() {
            Ok(ResolvedParams::new(resolved))
        } else {
            Err(errors)
        }
    }

    fn unsupported_action(&self, node: &Node) -> ReconflowError {
        let actions = self.registry.actions_for(node.software);
        ReconflowError::UnsupportedAction {
            node: node.name.clone(),
            software: node.software.to_string(),
            action: node.action.clone(),
            help: Some(format!(
                "Actions available for {}: {}",
                node.software,
                actions.join(", ")
            )),
        }
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn domain_error(scope: &Scope<'_>, key: &str, reason: String) -> ReconflowError {
    ReconflowError::ParameterDomain {
        node: scope.node.name.clone(),
        key: key.to_string(),
        reason,
    }
}

fn resolve_object(
    scope: &Scope<'_>,
    prefix: &str,
    specs: &[ParamSpec],
    raw: &Map<String, Value>,
    errors: &mut Vec<ReconflowError>,
) -> Map<String, Value> {
    for key in raw.keys() {
        if !specs.iter().any(|s| s.name == key) {
            errors.push(ReconflowError::UnsupportedParameter {
                node: scope.node.name.clone(),
                key: join_path(prefix, key),
                software: scope.schema.software.to_string(),
                action: scope.schema.action.to_string(),
            });
        }
    }

    let mut resolved = Map::new();

    for spec in specs {
        let path = join_path(prefix, spec.name);

        let value = match raw.get(spec.name) {
            Some(value) => value.clone(),
            None if spec.required => {
                errors.push(domain_error(scope, &path, "is required".into()));
                continue;
            }
            None => match spec.default {
                Some(default) => default.to_value(),
                None => continue,
            },
        };

        let checked = match spec.shape {
            Shape::One => check_value(scope, &path, &spec.kind, &value, errors),
            Shape::ScalarOrList => normalize_list(scope, &path, &spec.kind, &value, errors),
        };

        if let Some(v) = checked {
            resolved.insert(spec.name.to_string(), v);
        }
    }

    resolved
}

/// Wrap a scalar into a one-element array; check every entry of a list
fn normalize_list(
    scope: &Scope<'_>,
    path: &str,
    kind: &ValueKind,
    value: &Value,
    errors: &mut Vec<ReconflowError>,
) -> Option<Value> {
    let entries: Vec<(String, &Value)> = match value {
        Value::Array(items) if items.is_empty() => {
            errors.push(domain_error(scope, path, "must not be an empty list".into()));
            return None;
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("{}[{}]", path, i), v))
            .collect(),
        single => vec![(path.to_string(), single)],
    };

    let before = errors.len();
    let normalized: Vec<Value> = entries
        .into_iter()
        .filter_map(|(entry_path, v)| check_value(scope, &entry_path, kind, v, errors))
        .collect();

    (errors.len() == before).then_some(Value::Array(normalized))
}

fn check_value(
    scope: &Scope<'_>,
    path: &str,
    kind: &ValueKind,
    value: &Value,
    errors: &mut Vec<ReconflowError>,
) -> Option<Value> {
    let result = match kind {
        ValueKind::Bool => match value {
            Value::Bool(_) => Ok(value.clone()),
            _ => Err(format!("must be true or false (got {})", value)),
        },

        ValueKind::Integer { min, max } => as_integer(value)
            .ok_or_else(|| format!("must be a whole number (got {})", value))
            .and_then(|i| check_bounds(i as f64, min.map(|m| m as f64), max.map(|m| m as f64), value))
            .map(|_| as_integer(value).map(Value::from).unwrap_or(Value::Null)),

        ValueKind::Number { min, max } => value
            .as_f64()
            .ok_or_else(|| format!("must be a number (got {})", value))
            .and_then(|f| check_bounds(f, *min, *max, value))
            .map(|_| value.clone()),

        ValueKind::Text => match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err(format!("must be a string (got {})", value)),
        },

        ValueKind::OneOf(options) => match value.as_str() {
            Some(s) if options.contains(&s) => Ok(value.clone()),
            _ => Err(format!("must be one of: {} (got {})", options.join(", "), value)),
        },

        ValueKind::IntegerOneOf(options) => match as_integer(value) {
            Some(i) if options.contains(&i) => Ok(Value::from(i)),
            _ => Err(format!(
                "must be one of: {} (got {})",
                options
                    .iter()
                    .map(|o| o.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                value
            )),
        },

        ValueKind::Object(specs) => match value {
            Value::Object(map) => {
                return Some(Value::Object(resolve_object(scope, path, specs, map, errors)));
            }
            _ => Err(format!("must be an object (got {})", value)),
        },
    };

    match result {
        Ok(v) => Some(v),
        Err(reason) => {
            errors.push(domain_error(scope, path, reason));
            None
        }
    }
}

/// Integers, including integral floats written in scientific notation
fn as_integer(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    let f = value.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn check_bounds(v: f64, min: Option<f64>, max: Option<f64>, raw: &Value) -> Result<(), String> {
    if let Some(min) = min {
        if v < min {
            return Err(format!("must be at least {} (got {})", min, raw));
        }
    }
    if let Some(max) = max {
        if v > max {
            return Err(format!("must be at most {} (got {})", max, raw));
        }
    }
    Ok(())
}

/// Measure identifiers become part of artifact names: they must be unique
/// within the node and free of separators.
fn check_measures(
    scope: &Scope<'_>,
    key: &str,
    resolved: &Map<String, Value>,
    errors: &mut Vec<ReconflowError>,
) {
    let Some(entries) = resolved.get(key).and_then(Value::as_array) else {
        return;
    };

    let mut seen = HashSet::new();
    for (index, entry) in entries.iter().enumerate() {
        let settings = entry.as_object().cloned().unwrap_or_default();
        let id = measure_id(index, &settings);
        let path = format!("{}[{}].measure", key, index);

        if !is_qualifier_safe(&id) {
            errors.push(domain_error(
                scope,
                &path,
                format!("must only use letters, digits, '_', '.' or '+' (got \"{}\")", id),
            ));
        } else if !seen.insert(id.clone()) {
            errors.push(domain_error(
                scope,
                &path,
                format!("repeats measure identifier \"{}\"", id),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{NodeRef, Software};
    use serde_json::json;

    fn node(software: Software, action: &str, parameters: Value) -> Node {
        Node {
            name: "n".into(),
            software,
            action: action.into(),
            output_suffix: "out".into(),
            input: NodeRef::ExternalSource,
            parameters: parameters.as_object().cloned().unwrap_or_default(),
        }
    }

    fn resolve(node: &Node) -> Result<ResolvedParams, Vec<ReconflowError>> {
        let registry = SchemaRegistry::builtin();
        ParameterResolver::new(&registry).resolve(node)
    }

    #[test]
    fn test_defaults_are_applied() {
        let n = node(Software::DsiStudio, "tractography", json!({"fiber_count": 1000}));
        let params = resolve(&n).unwrap();

        assert_eq!(params.i64("fiber_count"), Some(1000));
        assert_eq!(params.f64("turning_angle"), Some(35.0));
        assert_eq!(params.i64("initial_dir"), Some(2));
        assert!(params.get("thread_count").is_none());
    }

    #[test]
    fn test_nested_defaults_and_scientific_notation() {
        let n = node(
            Software::Mrtrix3,
            "tractography",
            json!({
                "use_sift2": true,
                "tckgen": {"algorithm": "iFOD2", "select": 1e7, "max_length": 250}
            }),
        );
        let params = resolve(&n).unwrap();

        let tckgen = params.object("tckgen");
        assert_eq!(tckgen.i64("select"), Some(10_000_000));
        assert!(tckgen.bool("quiet"));
        assert_eq!(params.object("sift2").get("fd_scale_gm"), Some(&json!(false)));
    }

    #[test]
    fn test_unrecognized_keys_are_reported_with_paths() {
        let n = node(
            Software::Mrtrix3,
            "tractography",
            json!({
                "bogus": 1,
                "tckgen": {"algorithm": "iFOD2", "nope": true}
            }),
        );
        let errors = resolve(&n).unwrap_err();

        let keys: Vec<_> = errors
            .iter()
            .filter_map(|e| match e {
                ReconflowError::UnsupportedParameter { key, .. } => Some(key.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(keys, vec!["bogus", "tckgen.nope"]);
    }

    #[test]
    fn test_domain_errors() {
        let n = node(
            Software::Mrtrix3,
            "tractography",
            json!({"tckgen": {"algorithm": "FACT", "select": 1.5}}),
        );
        let errors = resolve(&n).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| matches!(e, ReconflowError::ParameterDomain { .. })));
    }

    #[test]
    fn test_missing_required_object() {
        let n = node(Software::Mrtrix3, "csd", json!({"response": {"algorithm": "dhollander"}}));
        let errors = resolve(&n).unwrap_err();
        assert!(matches!(
            &errors[0],
            ReconflowError::ParameterDomain { key, reason, .. } if key == "fod" && reason == "is required"
        ));
    }

    #[test]
    fn test_scalar_or_list_normalization() {
        let single = node(
            Software::Mrtrix3,
            "connectivity",
            json!({"tck2connectome": {"measure": "count"}}),
        );
        let listed = node(
            Software::Mrtrix3,
            "connectivity",
            json!({"tck2connectome": [{"measure": "count"}]}),
        );

        let a = resolve(&single).unwrap();
        let b = resolve(&listed).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.list("tck2connectome").len(), 1);
        assert_eq!(a.list("tck2connectome")[0]["stat_edge"], json!("sum"));
    }

    #[test]
    fn test_integer_scalar_or_list() {
        let n = node(
            Software::Mrtrix3,
            "csd",
            json!({
                "response": {"algorithm": "dhollander"},
                "fod": {"algorithm": "msmt_csd", "max_sh": 8}
            }),
        );
        let params = resolve(&n).unwrap();
        assert_eq!(params.object("fod").list("max_sh"), &[json!(8)]);
    }

    #[test]
    fn test_empty_list_rejected() {
        let n = node(Software::Mrtrix3, "connectivity", json!({"tck2connectome": []}));
        let errors = resolve(&n).unwrap_err();
        assert!(errors[0].to_string().contains("empty list"));
    }

    #[test]
    fn test_duplicate_measure_ids_rejected() {
        let n = node(
            Software::Mrtrix3,
            "connectivity",
            json!({"tck2connectome": [{"measure": "count"}, {"measure": "count"}]}),
        );
        let errors = resolve(&n).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("repeats"));
    }

    #[test]
    fn test_measure_id_with_separator_rejected() {
        let n = node(
            Software::Mrtrix3,
            "connectivity",
            json!({"tck2connectome": {"measure": "mean-length"}}),
        );
        assert!(resolve(&n).is_err());
    }

    #[test]
    fn test_unsupported_action() {
        let n = node(Software::Dipy, "csd", json!({}));
        let errors = resolve(&n).unwrap_err();
        match &errors[0] {
            ReconflowError::UnsupportedAction { help: Some(help), .. } => {
                assert!(help.contains("MAPMRI_reconstruction"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
