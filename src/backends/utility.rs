// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Built-in utility actions
//!
//! Small conversions and derived measures run through the
//! `qsiprep_recon_util` helper, one subcommand per action.

use std::path::PathBuf;

use super::{arg, path_arg, BackendAdapter, InvocationSpec, PlanContext};
use crate::errors::{ReconflowError, ReconflowResult};
use crate::pipeline::Software;

const TOOL: &str = "qsiprep_recon_util";

/// Adapter for the `qsiprep` software entry
pub struct UtilityAdapter;

impl BackendAdapter for UtilityAdapter {
    fn software(&self) -> Software {
        Software::Qsiprep
    }

    fn plan(&self, ctx: &PlanContext<'_>) -> ReconflowResult<Vec<InvocationSpec>> {
        let action = ctx.node.action.as_str();
        let (args, outputs) = match action {
            "controllability" => controllability(ctx)?,
            "discard_repeated_samples" | "reorient_fslstd" => rewrite_dwi(ctx, Vec::new()),
            "conform" => {
                let orientation = ctx.params.str("orientation").unwrap_or("LPS");
                rewrite_dwi(ctx, vec!["--orientation".into(), orientation.into()])
            }
            "mif_to_fib" => {
                let mif = ctx
                    .inputs
                    .find("_wmFOD.mif")
                    .or_else(|| ctx.inputs.find(".mif"))
                    .ok_or_else(|| ctx.incompatible("an ODF image (.mif)"))?;
                let fib = ctx.output("odfs", "fib.gz");
                (
                    vec![path_arg(mif), "--out".into(), path_arg(&fib)],
                    vec![fib],
                )
            }
            "steinhardt_order_parameters" => {
                let fib = ctx.upstream(".fib.gz", "a fiber orientation file (.fib.gz)")?;
                let order = ctx.params.get("order").map(arg).unwrap_or_else(|| "8".into());
                let out = ctx.output(&format!("q{}", order), "nii.gz");
                (
                    vec![
                        path_arg(fib),
                        "--order".into(),
                        order,
                        "--out".into(),
                        path_arg(&out),
                    ],
                    vec![out],
                )
            }
            other => {
                return Err(ReconflowError::UnsupportedAction {
                    node: ctx.node.name.clone(),
                    software: self.software().to_string(),
                    action: other.to_string(),
                    help: None,
                })
            }
        };

        let mut full = vec![action.to_string()];
        full.extend(args);
        Ok(vec![ctx.invocation(action, TOOL, full, outputs)])
    }

    fn tools(&self, _action: &str) -> Vec<&'static str> {
        vec![TOOL]
    }
}

type Planned = (Vec<String>, Vec<PathBuf>);

fn controllability(ctx: &PlanContext<'_>) -> ReconflowResult<Planned> {
    let matrix = ctx
        .inputs
        .find("_connectome.csv")
        .or_else(|| ctx.inputs.find("_connectivity.mat"))
        .ok_or_else(|| ctx.incompatible("a connectivity matrix"))?;
    let out = ctx.output("controllability", "csv");
    Ok((
        vec![path_arg(matrix), "--out".into(), path_arg(&out)],
        vec![out],
    ))
}

/// A rewritten DWI series with matching gradient tables
fn rewrite_dwi(ctx: &PlanContext<'_>, extra: Vec<String>) -> Planned {
    let dwi = ctx.output("dwi", "nii.gz");
    let bval = ctx.output("dwi", "bval");
    let bvec = ctx.output("dwi", "bvec");

    let mut args = vec![
        path_arg(ctx.inputs.dwi()),
        path_arg(&ctx.inputs.bval()),
        path_arg(&ctx.inputs.bvec()),
        "--out".into(),
        path_arg(&dwi),
    ];
    args.extend(extra);
    (args, vec![dwi, bval, bvec])
}
