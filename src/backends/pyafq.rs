// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! pyAFQ adapter: tract profiles along recognized bundles

use super::{arg, path_arg, BackendAdapter, InvocationSpec, PlanContext};
use crate::errors::{ReconflowError, ReconflowResult};
use crate::pipeline::Software;

const TOOL: &str = "pyAFQ";

const OPTIONS: [&str; 8] = [
    "odf_model",
    "directions",
    "max_angle",
    "sphere",
    "seed_mask",
    "n_seeds",
    "random_seeds",
    "clean_rounds",
];

/// pyAFQ adapter
pub struct PyAfqAdapter;

impl BackendAdapter for PyAfqAdapter {
    fn software(&self) -> Software {
        Software::PyAfq
    }

    fn plan(&self, ctx: &PlanContext<'_>) -> ReconflowResult<Vec<InvocationSpec>> {
        if ctx.node.action != "pyafq_tractometry" {
            return Err(ReconflowError::UnsupportedAction {
                node: ctx.node.name.clone(),
                software: self.software().to_string(),
                action: ctx.node.action.clone(),
                help: None,
            });
        }

        let profiles = ctx.output("tract_profiles", "csv");
        let bundles = ctx.output("bundles", "trk");

        let mut args = vec![
            "--dwi".to_string(),
            path_arg(ctx.inputs.dwi()),
            "--bval".to_string(),
            path_arg(&ctx.inputs.bval()),
            "--bvec".to_string(),
            path_arg(&ctx.inputs.bvec()),
            "--output-dir".to_string(),
            path_arg(&ctx.node_dir()),
            "--profiles".to_string(),
            path_arg(&profiles),
            "--bundles".to_string(),
            path_arg(&bundles),
        ];

        if ctx.params.bool("use_external_tracking") {
            let tracks = ctx.upstream(".tck", "a streamline file (.tck) to import")?;
            args.extend(["--import-tract".to_string(), path_arg(tracks)]);
        } else {
            for key in OPTIONS {
                if let Some(value) = ctx.params.get(key) {
                    args.push(format!("--{}", key));
                    args.push(arg(value));
                }
            }
        }
        if let Some(export) = ctx.params.str("export") {
            args.extend(["--export".to_string(), export.to_string()]);
        }

        Ok(vec![ctx.invocation(
            "tractometry",
            TOOL,
            args,
            vec![profiles, bundles],
        )])
    }

    fn tools(&self, _action: &str) -> Vec<&'static str> {
        vec![TOOL]
    }
}
