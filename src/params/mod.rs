// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Action parameters
//!
//! Each `(software, action)` pair has a declarative schema in the
//! [`SchemaRegistry`]. The [`ParameterResolver`] checks a node's raw
//! parameters against it, fills in defaults and normalizes scalar-or-list
//! keys to arrays, producing [`ResolvedParams`].

mod registry;
mod resolve;
mod schema;

pub use registry::{SchemaRegistry, BUILTIN_ACTIONS};
pub use resolve::ParameterResolver;
pub use schema::{ActionClass, ActionSchema, DefaultValue, ParamSpec, Shape, ValueKind};

use serde::Serialize;
use serde_json::{Map, Value};

/// A node's parameters after validation, defaults and list normalization
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResolvedParams(Map<String, Value>);

impl ResolvedParams {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn bool(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Nested object, wrapped so the same accessors apply
    pub fn object(&self, key: &str) -> ResolvedParams {
        self.0
            .get(key)
            .and_then(Value::as_object)
            .cloned()
            .map(Self)
            .unwrap_or_default()
    }

    /// Entries of a normalized scalar-or-list key (empty when absent)
    pub fn list(&self, key: &str) -> &[Value] {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Copy with one top-level key replaced
    pub fn with(&self, key: &str, value: Value) -> Self {
        let mut map = self.0.clone();
        map.insert(key.to_string(), value);
        Self(map)
    }

    /// Measure definitions of a connectivity action, in declaration order
    pub fn measures(&self, schema: &ActionSchema) -> Vec<MeasureDef> {
        let Some(key) = schema.measure_key else {
            return Vec::new();
        };

        self.list(key)
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let settings = entry.as_object().cloned().unwrap_or_default();
                MeasureDef {
                    id: measure_id(index, &settings),
                    settings: ResolvedParams(settings),
                }
            })
            .collect()
    }
}

/// One connectivity measure definition taken from a scalar-or-list key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasureDef {
    /// Identifier used in artifact names
    pub id: String,
    /// The entry's resolved settings
    pub settings: ResolvedParams,
}

/// Identifier of a measure entry: its `measure` field, else its position
pub fn measure_id(index: usize, entry: &Map<String, Value>) -> String {
    entry
        .get("measure")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| index.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accessors() {
        let params = ResolvedParams::new(
            json!({
                "use_5tt": true,
                "tckgen": {"algorithm": "iFOD2", "select": 10000000},
                "max_sh": [8, 8, 8]
            })
            .as_object()
            .cloned()
            .unwrap(),
        );

        assert!(params.bool("use_5tt"));
        assert!(!params.bool("use_sift2"));
        assert_eq!(params.object("tckgen").str("algorithm"), Some("iFOD2"));
        assert_eq!(params.object("tckgen").i64("select"), Some(10_000_000));
        assert_eq!(params.list("max_sh").len(), 3);
        assert!(params.list("missing").is_empty());
    }

    #[test]
    fn test_measure_ids_fall_back_to_position() {
        let named = json!({"measure": "radius2_count"});
        let unnamed = json!({"stat_edge": "mean"});
        assert_eq!(measure_id(0, named.as_object().unwrap()), "radius2_count");
        assert_eq!(measure_id(3, unnamed.as_object().unwrap()), "3");
    }
}
