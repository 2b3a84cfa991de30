// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Dipy adapter
//!
//! Each reconstruction model is fitted by a single `dipy_fit_*` command that
//! writes one image per scalar map next to the output prefix.

use std::path::PathBuf;

use super::{arg, path_arg, BackendAdapter, InvocationSpec, PlanContext};
use crate::errors::{ReconflowError, ReconflowResult};
use crate::pipeline::Software;

struct Model {
    action: &'static str,
    tool: &'static str,
    maps: &'static [&'static str],
    options: &'static [&'static str],
}

const MODELS: &[Model] = &[
    Model {
        action: "3dSHORE_reconstruction",
        tool: "dipy_fit_shore",
        maps: &["shcoeff", "rtop"],
        options: &["radial_order", "regularization", "lambdaN", "lambdaL", "zeta", "tau"],
    },
    Model {
        action: "MAPMRI_reconstruction",
        tool: "dipy_fit_mapmri",
        maps: &["mapcoeffs", "rtop", "rtap", "rtpp", "msd", "qiv", "ng", "ngpar", "ngperp"],
        options: &[
            "radial_order",
            "laplacian_regularization",
            "laplacian_weighting",
            "positivity_constraint",
            "anisotropic_scaling",
            "big_delta",
            "small_delta",
        ],
    },
    Model {
        action: "DKI_reconstruction",
        tool: "dipy_fit_dki",
        maps: &["fa", "md", "rd", "ad", "kfa", "mk", "ak", "rk"],
        options: &[],
    },
];

/// Dipy adapter
pub struct DipyAdapter;

impl BackendAdapter for DipyAdapter {
    fn software(&self) -> Software {
        Software::Dipy
    }

    fn plan(&self, ctx: &PlanContext<'_>) -> ReconflowResult<Vec<InvocationSpec>> {
        let model = MODELS
            .iter()
            .find(|m| m.action == ctx.node.action)
            .ok_or_else(|| ReconflowError::UnsupportedAction {
                node: ctx.node.name.clone(),
                software: self.software().to_string(),
                action: ctx.node.action.clone(),
                help: None,
            })?;

        let mut outputs: Vec<PathBuf> = model
            .maps
            .iter()
            .map(|m| ctx.output(m, "nii.gz"))
            .collect();

        let mut args = vec![
            "--dwi".to_string(),
            path_arg(ctx.inputs.dwi()),
            "--bval".to_string(),
            path_arg(&ctx.inputs.bval()),
            "--bvec".to_string(),
            path_arg(&ctx.inputs.bvec()),
            "--out-prefix".to_string(),
            path_arg(ctx.stem),
        ];
        for key in model.options {
            if let Some(value) = ctx.params.get(key) {
                args.push(format!("--{}", key));
                args.push(arg(value));
            }
        }

        if ctx.params.bool("write_fibgz") {
            let fib = ctx.output("odfs", "fib.gz");
            args.extend(["--fibgz".to_string(), path_arg(&fib)]);
            outputs.push(fib);
        }
        if ctx.params.bool("write_mif") {
            let mif = ctx.output("odfs", "mif");
            args.extend(["--mif".to_string(), path_arg(&mif)]);
            outputs.push(mif);
        }

        // The extrapolated series replaces the input DWI for downstream nodes
        if let Some(scheme) = ctx.params.str("extrapolate_scheme") {
            let dwi = ctx.output("extrapolated_dwi", "nii.gz");
            args.extend([
                "--extrapolate-scheme".to_string(),
                scheme.to_string(),
                "--extrapolated".to_string(),
                path_arg(&dwi),
            ]);
            outputs.push(ctx.output("extrapolated_dwi", "bval"));
            outputs.push(ctx.output("extrapolated_dwi", "bvec"));
            outputs.push(dwi);
        }

        Ok(vec![ctx.invocation("fit", model.tool, args, outputs)])
    }

    fn tools(&self, action: &str) -> Vec<&'static str> {
        MODELS
            .iter()
            .filter(|m| m.action == action)
            .map(|m| m.tool)
            .collect()
    }
}
