// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Atlas expansion
//!
//! A connectivity node is run once per atlas and measure. Every other node
//! is run exactly once.

use serde::Serialize;
use serde_json::Value;

use crate::params::{ActionSchema, ResolvedParams};

/// Distinguishes the instances of one expanded node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Qualifier {
    pub atlas: String,
    pub measure: Option<String>,
}

impl std::fmt::Display for Qualifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "atlas-{}", self.atlas)?;
        if let Some(measure) = &self.measure {
            write!(f, "_measure-{}", measure)?;
        }
        Ok(())
    }
}

/// One instance produced by expansion
#[derive(Debug, Clone)]
pub struct ExpandedInstance {
    pub qualifier: Option<Qualifier>,
    /// Node parameters, with the measure key narrowed to this instance's entry
    pub params: ResolvedParams,
}

/// Expand a node over atlases and measures.
///
/// Connectivity actions yield M x K instances in atlas-major order, where K
/// is the number of measure entries (1 if the action has no measure key).
/// Other actions yield a single unqualified instance. `atlases` is only
/// consulted for connectivity actions.
pub fn expand(
    schema: &ActionSchema,
    params: &ResolvedParams,
    atlases: &[String],
) -> Vec<ExpandedInstance> {
    if !schema.is_connectivity() {
        return vec![ExpandedInstance {
            qualifier: None,
            params: params.clone(),
        }];
    }

    let measures = params.measures(schema);
    let mut instances = Vec::with_capacity(atlases.len() * measures.len().max(1));

    for atlas in atlases {
        if measures.is_empty() {
            instances.push(ExpandedInstance {
                qualifier: Some(Qualifier {
                    atlas: atlas.clone(),
                    measure: None,
                }),
                params: params.clone(),
            });
            continue;
        }

        for measure in &measures {
            let narrowed = match schema.measure_key {
                Some(key) => params.with(key, Value::Object(measure.settings.as_map().clone())),
                None => params.clone(),
            };
            instances.push(ExpandedInstance {
                qualifier: Some(Qualifier {
                    atlas: atlas.clone(),
                    measure: Some(measure.id.clone()),
                }),
                params: narrowed,
            });
        }
    }

    instances
}
