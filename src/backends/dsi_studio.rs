// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! DSI Studio adapter
//!
//! Every action is a `dsi_studio --action=<x>` call with `--key=value`
//! options.

use std::path::Path;

use super::{arg, path_arg, BackendAdapter, InvocationSpec, PlanContext};
use crate::errors::{ReconflowError, ReconflowResult};
use crate::pipeline::Software;

const TOOL: &str = "dsi_studio";

/// DSI Studio adapter
pub struct DsiStudioAdapter;

impl BackendAdapter for DsiStudioAdapter {
    fn software(&self) -> Software {
        Software::DsiStudio
    }

    fn plan(&self, ctx: &PlanContext<'_>) -> ReconflowResult<Vec<InvocationSpec>> {
        match ctx.node.action.as_str() {
            "reconstruction" => plan_reconstruction(ctx),
            "export" => plan_export(ctx),
            "tractography" => plan_tractography(ctx),
            "connectivity" => plan_connectivity(ctx),
            "autotrack" => plan_autotrack(ctx),
            other => Err(ReconflowError::UnsupportedAction {
                node: ctx.node.name.clone(),
                software: self.software().to_string(),
                action: other.to_string(),
                help: None,
            }),
        }
    }

    fn tools(&self, _action: &str) -> Vec<&'static str> {
        vec![TOOL]
    }
}

fn opt(key: &str, value: impl AsRef<str>) -> String {
    format!("--{}={}", key, value.as_ref())
}

fn path_opt(key: &str, path: &Path) -> String {
    opt(key, path_arg(path))
}

fn fib<'a>(ctx: &PlanContext<'a>) -> ReconflowResult<&'a Path> {
    ctx.upstream(".fib.gz", "a fiber orientation file (.fib.gz)")
}

/// Split a comma-separated option value, dropping blanks
fn entries(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn plan_reconstruction(ctx: &PlanContext<'_>) -> ReconflowResult<Vec<InvocationSpec>> {
    let src = ctx.output("dwi", "src.gz");
    let fib = ctx.output("odfs", "fib.gz");

    let src_args = vec![
        opt("action", "src"),
        path_opt("source", ctx.inputs.dwi()),
        path_opt("bval", &ctx.inputs.bval()),
        path_opt("bvec", &ctx.inputs.bvec()),
        path_opt("output", &src),
    ];

    let method = ctx.params.str("method").unwrap_or("gqi");
    let mut rec_args = vec![
        opt("action", "rec"),
        path_opt("source", &src),
        opt("method", if method == "dti" { "1" } else { "4" }),
    ];
    if method == "gqi" {
        if let Some(param0) = ctx.params.get("param0") {
            rec_args.push(opt("param0", arg(param0)));
        }
    }
    if let Some(n) = ctx.params.get("num_fibers") {
        rec_args.push(opt("num_fiber", arg(n)));
    }
    if let Some(order) = ctx.params.get("odf_order") {
        rec_args.push(opt("odf_order", arg(order)));
    }
    rec_args.push(opt("record_odf", "1"));
    rec_args.push(path_opt("output", &fib));

    Ok(vec![
        ctx.invocation("src", TOOL, src_args, vec![src.clone()]),
        ctx.invocation("rec", TOOL, rec_args, vec![fib]),
    ])
}

fn plan_export(ctx: &PlanContext<'_>) -> ReconflowResult<Vec<InvocationSpec>> {
    let source = fib(ctx)?;
    let metrics = entries(ctx.params.str("metrics").unwrap_or_default());
    if metrics.is_empty() {
        return Err(ctx.domain_error("metrics", "must name at least one metric"));
    }

    let outputs = metrics
        .iter()
        .map(|m| ctx.output(m, "nii.gz"))
        .collect::<Vec<_>>();
    let args = vec![
        opt("action", "exp"),
        path_opt("source", source),
        opt("export", metrics.join(",")),
        path_opt("output", &ctx.node_dir()),
    ];

    Ok(vec![ctx.invocation("exp", TOOL, args, outputs)])
}

fn plan_tractography(ctx: &PlanContext<'_>) -> ReconflowResult<Vec<InvocationSpec>> {
    let source = fib(ctx)?;
    let tracks = ctx.output("streamlines", "trk.gz");

    let mut args = vec![opt("action", "trk"), path_opt("source", source)];
    for key in [
        "fiber_count",
        "turning_angle",
        "method",
        "smoothing",
        "step_size",
        "min_length",
        "max_length",
        "seed_plan",
        "interpolation",
        "initial_dir",
        "otsu_threshold",
        "thread_count",
    ] {
        if let Some(value) = ctx.params.get(key) {
            args.push(opt(key, arg(value)));
        }
    }
    args.push(path_opt("output", &tracks));

    Ok(vec![ctx.invocation("trk", TOOL, args, vec![tracks])])
}

fn plan_connectivity(ctx: &PlanContext<'_>) -> ReconflowResult<Vec<InvocationSpec>> {
    let source = fib(ctx)?;
    let tracks = ctx.upstream(".trk.gz", "a streamline file (.trk.gz)")?;
    let atlas = ctx.atlas()?;

    let values = entries(ctx.params.str("connectivity_value").unwrap_or_default());
    let types = entries(ctx.params.str("connectivity_type").unwrap_or_default());
    if values.is_empty() {
        return Err(ctx.domain_error("connectivity_value", "must name at least one value"));
    }
    if types.is_empty() {
        return Err(ctx.domain_error("connectivity_type", "must name at least one type"));
    }

    let prefix = ctx.output("connectivity", "mat");
    let outputs = values
        .iter()
        .flat_map(|v| types.iter().map(move |t| (v, t)))
        .map(|(v, t)| ctx.output(&format!("{}_{}_connectivity", v, t), "mat"))
        .collect::<Vec<_>>();

    let args = vec![
        opt("action", "ana"),
        path_opt("source", source),
        path_opt("tract", tracks),
        path_opt("connectivity", atlas),
        opt("connectivity_value", values.join(",")),
        opt("connectivity_type", types.join(",")),
        path_opt("output", &prefix),
    ];

    Ok(vec![ctx.invocation("ana", TOOL, args, outputs)])
}

fn plan_autotrack(ctx: &PlanContext<'_>) -> ReconflowResult<Vec<InvocationSpec>> {
    let source = fib(ctx)?;
    let stats = ctx.output("bundlestats", "csv");

    let mut args = vec![opt("action", "atk"), path_opt("source", source)];
    for key in ["track_id", "tolerance", "track_voxel_ratio", "yield_rate"] {
        if let Some(value) = ctx.params.get(key) {
            args.push(opt(key, arg(value)));
        }
    }
    args.push(path_opt("output", &ctx.node_dir()));
    args.push(path_opt("export_stat", &stats));

    Ok(vec![ctx.invocation("atk", TOOL, args, vec![stats])])
}
