// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! AMICO adapter: NODDI fitting

use super::{arg, path_arg, BackendAdapter, InvocationSpec, PlanContext};
use crate::errors::{ReconflowError, ReconflowResult};
use crate::pipeline::Software;

const TOOL: &str = "amico_noddi";
const MAPS: [&str; 4] = ["icvf", "isovf", "od", "directions"];

/// AMICO adapter
pub struct AmicoAdapter;

impl BackendAdapter for AmicoAdapter {
    fn software(&self) -> Software {
        Software::Amico
    }

    fn plan(&self, ctx: &PlanContext<'_>) -> ReconflowResult<Vec<InvocationSpec>> {
        if ctx.node.action != "fit_noddi" {
            return Err(ReconflowError::UnsupportedAction {
                node: ctx.node.name.clone(),
                software: self.software().to_string(),
                action: ctx.node.action.clone(),
                help: None,
            });
        }

        let mut outputs: Vec<_> = MAPS.iter().map(|m| ctx.output(m, "nii.gz")).collect();
        let fib = ctx.output("noddi", "fib.gz");

        let mut args = vec![
            "--dwi".to_string(),
            path_arg(ctx.inputs.dwi()),
            "--bval".to_string(),
            path_arg(&ctx.inputs.bval()),
            "--bvec".to_string(),
            path_arg(&ctx.inputs.bvec()),
            "--out-prefix".to_string(),
            path_arg(ctx.stem),
            "--fibgz".to_string(),
            path_arg(&fib),
        ];
        for key in ["dPar", "dIso", "b0_threshold"] {
            if let Some(value) = ctx.params.get(key) {
                args.push(format!("--{}", key));
                args.push(arg(value));
            }
        }
        if ctx.params.bool("isExvivo") {
            args.push("--ex-vivo".into());
        }
        outputs.push(fib);

        Ok(vec![ctx.invocation("noddi", TOOL, args, outputs)])
    }

    fn tools(&self, _action: &str) -> Vec<&'static str> {
        vec![TOOL]
    }
}
