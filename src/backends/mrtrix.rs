// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! MRtrix3 adapter
//!
//! Constrained spherical deconvolution, streamline tractography and
//! connectome construction.

use std::path::PathBuf;

use super::{arg, path_arg, BackendAdapter, InvocationSpec, PlanContext};
use crate::errors::{ReconflowError, ReconflowResult};
use crate::params::ResolvedParams;
use crate::pipeline::Software;

const TISSUES: [&str; 3] = ["wm", "gm", "csf"];

/// MRtrix3 adapter
pub struct MrtrixAdapter;

impl BackendAdapter for MrtrixAdapter {
    fn software(&self) -> Software {
        Software::Mrtrix3
    }

    fn plan(&self, ctx: &PlanContext<'_>) -> ReconflowResult<Vec<InvocationSpec>> {
        match ctx.node.action.as_str() {
            "csd" => plan_csd(ctx),
            "tractography" => plan_tractography(ctx),
            "global_tractography" => plan_global(ctx),
            "connectivity" => plan_connectivity(ctx),
            other => Err(ReconflowError::UnsupportedAction {
                node: ctx.node.name.clone(),
                software: self.software().to_string(),
                action: other.to_string(),
                help: None,
            }),
        }
    }

    fn tools(&self, action: &str) -> Vec<&'static str> {
        match action {
            "csd" => vec!["dwi2response", "dwi2fod", "mtnormalise"],
            "tractography" => vec!["tckgen", "tcksift2"],
            "global_tractography" => vec!["tckglobal"],
            "connectivity" => vec!["tck2connectome"],
            _ => vec![],
        }
    }
}

fn gradient_args(ctx: &PlanContext<'_>) -> Vec<String> {
    vec![
        "-fslgrad".into(),
        path_arg(&ctx.inputs.bvec()),
        path_arg(&ctx.inputs.bval()),
    ]
}

fn plan_csd(ctx: &PlanContext<'_>) -> ReconflowResult<Vec<InvocationSpec>> {
    let response = ctx.params.object("response");
    let fod = ctx.params.object("fod");
    let response_algorithm = response.str("algorithm").unwrap_or("dhollander");
    let fod_algorithm = fod.str("algorithm").unwrap_or("csd");

    let multi_tissue = response_algorithm == "dhollander";
    if fod_algorithm != "csd" && !multi_tissue {
        return Err(ctx.domain_error(
            "fod.algorithm",
            format!(
                "'{}' needs a multi-tissue response, but response.algorithm is '{}'",
                fod_algorithm, response_algorithm
            ),
        ));
    }

    let tissues: &[&str] = if fod_algorithm == "csd" {
        &TISSUES[..1]
    } else {
        &TISSUES
    };
    let normalize = ctx.params.bool("mtnormalize");
    let dwi = path_arg(ctx.inputs.dwi());

    let responses: Vec<PathBuf> = tissues
        .iter()
        .map(|t| ctx.output(&format!("{}Response", t), "txt"))
        .collect();
    let raw_fods: Vec<PathBuf> = tissues
        .iter()
        .map(|t| {
            if normalize {
                ctx.output(&format!("{}FODraw", t), "mif")
            } else {
                ctx.output(&format!("{}FOD", t), "mif")
            }
        })
        .collect();

    let mut invocations = Vec::new();

    // Single-tissue response algorithms only estimate white matter.
    let estimated = if multi_tissue { &responses[..] } else { &responses[..1] };
    let mut args = vec![response_algorithm.to_string(), dwi.clone()];
    args.extend(estimated.iter().map(|p| path_arg(p)));
    args.extend(gradient_args(ctx));
    invocations.push(ctx.invocation("dwi2response", "dwi2response", args, estimated.to_vec()));

    let (tool, mut args) = if fod_algorithm == "ss3t" {
        ("ss3t_csd_beta1", vec![dwi])
    } else {
        ("dwi2fod", vec![fod_algorithm.to_string(), dwi])
    };
    for (response, fod_out) in responses.iter().zip(&raw_fods) {
        args.push(path_arg(response));
        args.push(path_arg(fod_out));
    }
    args.extend(gradient_args(ctx));
    let max_sh = fod.list("max_sh");
    if !max_sh.is_empty() {
        args.push("-lmax".into());
        args.push(max_sh.iter().map(arg).collect::<Vec<_>>().join(","));
    }
    invocations.push(ctx.invocation("fod", tool, args, raw_fods.clone()));

    if normalize {
        let normalized: Vec<PathBuf> = tissues
            .iter()
            .map(|t| ctx.output(&format!("{}FOD", t), "mif"))
            .collect();
        let mut args = Vec::new();
        for (raw, norm) in raw_fods.iter().zip(&normalized) {
            args.push(path_arg(raw));
            args.push(path_arg(norm));
        }
        invocations.push(ctx.invocation("mtnormalise", "mtnormalise", args, normalized));
    }

    Ok(invocations)
}

fn five_tt(ctx: &PlanContext<'_>) -> ReconflowResult<PathBuf> {
    let method = ctx.params.str("method_5tt").unwrap_or("hsvs");
    let name = format!("mrtrix_5tt_{}", method);
    ctx.inputs.anatomical_path(&name).ok_or_else(|| {
        ctx.domain_error(
            "use_5tt",
            format!("requires '{}' in the pipeline's anatomical list", name),
        )
    })
}

fn plan_tractography(ctx: &PlanContext<'_>) -> ReconflowResult<Vec<InvocationSpec>> {
    let fod = ctx.upstream("_wmFOD.mif", "a white matter FOD image (_wmFOD.mif)")?;
    let tckgen = ctx.params.object("tckgen");
    let use_5tt = ctx.params.bool("use_5tt");

    for flag in ["crop_at_gmwmi", "backtrack"] {
        if tckgen.bool(flag) && !use_5tt {
            return Err(ctx.domain_error(
                &format!("tckgen.{}", flag),
                "requires use_5tt to be enabled",
            ));
        }
    }

    let tracks = ctx.output("tracks", "tck");
    let mut args = vec![path_arg(fod), path_arg(&tracks)];
    push_option(&mut args, "-algorithm", &tckgen, "algorithm");
    push_option(&mut args, "-select", &tckgen, "select");
    push_option(&mut args, "-maxlength", &tckgen, "max_length");
    push_option(&mut args, "-minlength", &tckgen, "min_length");
    push_option(&mut args, "-power", &tckgen, "power");
    push_option(&mut args, "-angle", &tckgen, "angle");
    push_option(&mut args, "-cutoff", &tckgen, "cutoff");

    let five_tt = if use_5tt { Some(five_tt(ctx)?) } else { None };
    match &five_tt {
        Some(image) => {
            args.extend(["-act".to_string(), path_arg(image)]);
            args.extend(["-seed_gmwmi".to_string(), path_arg(image)]);
        }
        None => args.extend(["-seed_dynamic".to_string(), path_arg(fod)]),
    }
    for (flag, key) in [
        ("-crop_at_gmwmi", "crop_at_gmwmi"),
        ("-backtrack", "backtrack"),
        ("-quiet", "quiet"),
    ] {
        if tckgen.bool(key) {
            args.push(flag.into());
        }
    }

    let mut invocations = vec![ctx.invocation("tckgen", "tckgen", args, vec![tracks.clone()])];

    if ctx.params.bool("use_sift2") {
        let weights = ctx.output("siftweights", "csv");
        let mu = ctx.output("mu", "txt");
        let mut args = vec![path_arg(&tracks), path_arg(fod), path_arg(&weights)];
        args.extend(["-out_mu".to_string(), path_arg(&mu)]);
        if let Some(image) = &five_tt {
            args.extend(["-act".to_string(), path_arg(image)]);
        }
        if ctx.params.object("sift2").bool("fd_scale_gm") {
            args.push("-fd_scale_gm".into());
        }
        invocations.push(ctx.invocation("tcksift2", "tcksift2", args, vec![weights, mu]));
    }

    Ok(invocations)
}

fn plan_global(ctx: &PlanContext<'_>) -> ReconflowResult<Vec<InvocationSpec>> {
    let wm = ctx.upstream("_wmResponse.txt", "a white matter response (_wmResponse.txt)")?;
    let tckglobal = ctx.params.object("tckglobal");

    let tracks = ctx.output("tracks", "tck");
    let fod = ctx.output("wmFOD", "mif");
    let fiso = ctx.output("fiso", "mif");

    let mut args = vec![path_arg(ctx.inputs.dwi()), path_arg(wm)];
    for tissue in ["gm", "csf"] {
        if let Some(response) = ctx.inputs.find(&format!("_{}Response.txt", tissue)) {
            args.extend(["-riso".to_string(), path_arg(response)]);
        }
    }
    args.extend(gradient_args(ctx));
    push_option(&mut args, "-niter", &tckglobal, "niter");
    push_option(&mut args, "-lmax", &tckglobal, "lmax");
    push_option(&mut args, "-length", &tckglobal, "particle_length");
    push_option(&mut args, "-weight", &tckglobal, "weight");
    push_option(&mut args, "-ppot", &tckglobal, "ppot");
    push_option(&mut args, "-cpot", &tckglobal, "cpot");
    push_option(&mut args, "-density", &tckglobal, "density");
    args.extend(["-fod".to_string(), path_arg(&fod)]);
    args.extend(["-fiso".to_string(), path_arg(&fiso)]);
    args.push(path_arg(&tracks));

    Ok(vec![ctx.invocation(
        "tckglobal",
        "tckglobal",
        args,
        vec![tracks, fod, fiso],
    )])
}

fn plan_connectivity(ctx: &PlanContext<'_>) -> ReconflowResult<Vec<InvocationSpec>> {
    let tracks = ctx.upstream(".tck", "a streamline file (.tck)")?;
    let atlas = ctx.atlas()?;
    let settings = ctx.params.object("tck2connectome");

    let connectome = ctx.output("connectome", "csv");
    let assignments = ctx.output("assignments", "txt");

    let mut args = vec![path_arg(tracks), path_arg(atlas), path_arg(&connectome)];
    push_option(&mut args, "-search_radius", &settings, "search_radius");
    push_option(&mut args, "-stat_edge", &settings, "stat_edge");
    for (flag, key) in [
        ("-symmetric", "symmetric"),
        ("-zero_diagonal", "zero_diagonal"),
        ("-scale_invnodevol", "scale_invnodevol"),
    ] {
        if settings.bool(key) {
            args.push(flag.into());
        }
    }
    match settings.str("length_scale") {
        Some("length") => args.push("-scale_length".into()),
        Some("invlength") => args.push("-scale_invlength".into()),
        _ => {}
    }

    if ctx.params.bool("use_sift_weights") || settings.bool("use_sift_weights") {
        let weights = ctx.upstream("_siftweights.csv", "SIFT2 weights (_siftweights.csv)")?;
        args.extend(["-tck_weights_in".to_string(), path_arg(weights)]);
    }
    args.extend(["-out_assignments".to_string(), path_arg(&assignments)]);
    args.push("-force".into());

    Ok(vec![ctx.invocation(
        "tck2connectome",
        "tck2connectome",
        args,
        vec![connectome, assignments],
    )])
}

fn push_option(args: &mut Vec<String>, flag: &str, params: &ResolvedParams, key: &str) {
    if let Some(value) = params.get(key) {
        args.push(flag.to_string());
        args.push(arg(value));
    }
}
