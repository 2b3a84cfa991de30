// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Parameter schema registry
//!
//! One [`ActionSchema`] per supported `(software, action)` pair. Adding an
//! action means adding a table and an entry to [`BUILTIN_ACTIONS`]; nothing
//! else is touched.

use std::collections::BTreeMap;

use super::schema::{
    int_min, num_min, num_range, ActionClass, ActionSchema, DefaultValue as D, ParamSpec as P,
    ValueKind as K, ANY_NUMBER,
};
use crate::pipeline::Software;

const PLOT_REPORTS: P = P::defaulted("plot_reports", K::Bool, D::Bool(true));

// ─────────────────────────────────────────────────────────────────────────────
// DSI Studio
// ─────────────────────────────────────────────────────────────────────────────

const DSI_RECONSTRUCTION: &[P] = &[
    P::defaulted("method", K::OneOf(&["gqi", "dti"]), D::Text("gqi")),
    P::defaulted("param0", num_min(0.0), D::Float(1.25)),
    P::defaulted("num_fibers", int_min(1), D::Int(3)),
    P::defaulted("odf_order", K::IntegerOneOf(&[4, 6, 8, 10, 12, 16, 20]), D::Int(8)),
    PLOT_REPORTS,
];

const DSI_EXPORT: &[P] = &[P::defaulted(
    "metrics",
    K::Text,
    D::Text("gfa,qa,iso,dti_fa,md,ad,rd"),
)];

const DSI_TRACTOGRAPHY: &[P] = &[
    P::defaulted("fiber_count", int_min(1), D::Int(5_000_000)),
    P::defaulted("turning_angle", num_range(0.0, 90.0), D::Float(35.0)),
    P::defaulted("method", K::IntegerOneOf(&[0, 1]), D::Int(0)),
    P::defaulted("smoothing", num_range(0.0, 1.0), D::Float(0.0)),
    P::defaulted("step_size", num_min(0.0), D::Float(1.0)),
    P::defaulted("min_length", num_min(0.0), D::Float(30.0)),
    P::defaulted("max_length", num_min(0.0), D::Float(250.0)),
    P::defaulted("seed_plan", K::IntegerOneOf(&[0, 1]), D::Int(0)),
    P::defaulted("interpolation", K::IntegerOneOf(&[0, 1, 2]), D::Int(0)),
    P::defaulted("initial_dir", K::IntegerOneOf(&[0, 1, 2]), D::Int(2)),
    P::defaulted("otsu_threshold", num_range(0.0, 1.0), D::Float(0.6)),
    P::optional("thread_count", int_min(1)),
];

const DSI_CONNECTIVITY: &[P] = &[
    P::defaulted(
        "connectivity_value",
        K::Text,
        D::Text("count,ncount,mean_length,gfa"),
    ),
    P::defaulted("connectivity_type", K::Text, D::Text("pass,end")),
];

const DSI_AUTOTRACK: &[P] = &[
    P::defaulted(
        "track_id",
        K::Text,
        D::Text("Association,Projection,Commissure,Cerebellum,CranialNerve"),
    ),
    P::defaulted("tolerance", K::Text, D::Text("22,26,30")),
    P::defaulted("track_voxel_ratio", num_min(0.0), D::Float(2.0)),
    P::defaulted("yield_rate", num_min(0.0), D::Float(1e-6)),
];

// ─────────────────────────────────────────────────────────────────────────────
// MRtrix3
// ─────────────────────────────────────────────────────────────────────────────

const MRTRIX_RESPONSE: &[P] = &[P::required(
    "algorithm",
    K::OneOf(&["dhollander", "tournier", "tax", "fa"]),
)];

const MRTRIX_FOD: &[P] = &[
    P::required("algorithm", K::OneOf(&["csd", "msmt_csd", "ss3t"])),
    P::optional("max_sh", int_min(0)).or_list(),
];

const MRTRIX_CSD: &[P] = &[
    P::defaulted("mtnormalize", K::Bool, D::Bool(true)),
    P::required("response", K::Object(MRTRIX_RESPONSE)),
    P::required("fod", K::Object(MRTRIX_FOD)),
    PLOT_REPORTS,
];

const MRTRIX_TCKGLOBAL: &[P] = &[
    P::defaulted("niter", int_min(1), D::Int(100_000_000)),
    P::defaulted("lmax", K::IntegerOneOf(&[2, 4, 6, 8, 10, 12]), D::Int(8)),
    P::optional("particle_length", num_min(0.0)),
    P::optional("weight", num_min(0.0)),
    P::optional("ppot", ANY_NUMBER),
    P::optional("cpot", ANY_NUMBER),
    P::optional("density", num_min(0.0)),
];

const MRTRIX_GLOBAL_TRACTOGRAPHY: &[P] = &[
    P::defaulted("tckglobal", K::Object(MRTRIX_TCKGLOBAL), D::EmptyObject),
    PLOT_REPORTS,
];

const MRTRIX_TCKGEN: &[P] = &[
    P::required(
        "algorithm",
        K::OneOf(&["iFOD2", "iFOD1", "SD_Stream", "Tensor_Det", "Tensor_Prob"]),
    ),
    P::defaulted("select", int_min(1), D::Int(10_000_000)),
    P::optional("max_length", num_min(0.0)),
    P::optional("min_length", num_min(0.0)),
    P::optional("power", num_min(0.0)),
    P::optional("angle", num_range(0.0, 90.0)),
    P::optional("cutoff", num_min(0.0)),
    P::defaulted("crop_at_gmwmi", K::Bool, D::Bool(false)),
    P::defaulted("backtrack", K::Bool, D::Bool(false)),
    P::defaulted("quiet", K::Bool, D::Bool(true)),
];

const MRTRIX_SIFT2: &[P] = &[P::defaulted("fd_scale_gm", K::Bool, D::Bool(false))];

const MRTRIX_TRACTOGRAPHY: &[P] = &[
    P::defaulted("use_5tt", K::Bool, D::Bool(false)),
    P::defaulted("method_5tt", K::OneOf(&["hsvs", "fast"]), D::Text("hsvs")),
    P::defaulted("use_sift2", K::Bool, D::Bool(false)),
    P::required("tckgen", K::Object(MRTRIX_TCKGEN)),
    P::defaulted("sift2", K::Object(MRTRIX_SIFT2), D::EmptyObject),
];

const MRTRIX_TCK2CONNECTOME: &[P] = &[
    P::defaulted("zero_diagonal", K::Bool, D::Bool(false)),
    P::defaulted("search_radius", num_min(0.0), D::Float(2.0)),
    P::defaulted("scale_invnodevol", K::Bool, D::Bool(false)),
    P::defaulted("symmetric", K::Bool, D::Bool(true)),
    P::defaulted("use_sift_weights", K::Bool, D::Bool(false)),
    P::defaulted("stat_edge", K::OneOf(&["sum", "mean", "min", "max"]), D::Text("sum")),
    P::optional("length_scale", K::OneOf(&["length", "invlength"])),
    P::optional("measure", K::Text),
];

const MRTRIX_CONNECTIVITY: &[P] = &[
    P::defaulted("use_sift_weights", K::Bool, D::Bool(false)),
    P::required("tck2connectome", K::Object(MRTRIX_TCK2CONNECTOME)).or_list(),
];

// ─────────────────────────────────────────────────────────────────────────────
// Dipy
// ─────────────────────────────────────────────────────────────────────────────

const DIPY_SHORE: &[P] = &[
    P::defaulted("radial_order", K::IntegerOneOf(&[2, 4, 6, 8, 10]), D::Int(8)),
    P::defaulted("regularization", K::OneOf(&["L2", "L1"]), D::Text("L2")),
    P::defaulted("lambdaN", num_min(0.0), D::Float(1e-8)),
    P::defaulted("lambdaL", num_min(0.0), D::Float(1e-8)),
    P::defaulted("zeta", num_min(0.0), D::Float(700.0)),
    P::defaulted("tau", num_min(0.0), D::Float(0.025_330_295_910_584_444)),
    P::defaulted("write_fibgz", K::Bool, D::Bool(true)),
    P::defaulted("write_mif", K::Bool, D::Bool(true)),
    P::optional("extrapolate_scheme", K::OneOf(&["HCP", "ABCD"])),
    PLOT_REPORTS,
];

const DIPY_MAPMRI: &[P] = &[
    P::defaulted("radial_order", K::IntegerOneOf(&[2, 4, 6, 8, 10]), D::Int(6)),
    P::defaulted("laplacian_regularization", K::Bool, D::Bool(true)),
    P::defaulted("laplacian_weighting", num_min(0.0), D::Float(0.2)),
    P::defaulted("positivity_constraint", K::Bool, D::Bool(false)),
    P::defaulted("anisotropic_scaling", K::Bool, D::Bool(true)),
    P::optional("big_delta", num_min(0.0)),
    P::optional("small_delta", num_min(0.0)),
    P::defaulted("write_fibgz", K::Bool, D::Bool(true)),
    P::defaulted("write_mif", K::Bool, D::Bool(true)),
    PLOT_REPORTS,
];

const DIPY_DKI: &[P] = &[
    P::defaulted("write_fibgz", K::Bool, D::Bool(false)),
    P::defaulted("write_mif", K::Bool, D::Bool(false)),
];

// ─────────────────────────────────────────────────────────────────────────────
// AMICO, pyAFQ, qsiprep utilities
// ─────────────────────────────────────────────────────────────────────────────

const AMICO_NODDI: &[P] = &[
    P::defaulted("isExvivo", K::Bool, D::Bool(false)),
    P::defaulted("dPar", num_min(0.0), D::Float(1.7e-3)),
    P::defaulted("dIso", num_min(0.0), D::Float(3.0e-3)),
    P::defaulted("b0_threshold", num_min(0.0), D::Float(50.0)),
];

const PYAFQ_TRACTOMETRY: &[P] = &[
    P::defaulted("use_external_tracking", K::Bool, D::Bool(false)),
    P::defaulted("export", K::OneOf(&["all"]), D::Text("all")),
    P::defaulted("odf_model", K::OneOf(&["CSD", "DTI", "DKI"]), D::Text("CSD")),
    P::defaulted("directions", K::OneOf(&["det", "prob"]), D::Text("prob")),
    P::defaulted("max_angle", num_range(0.0, 180.0), D::Float(30.0)),
    P::defaulted("sphere", K::Text, D::Text("repulsion724")),
    P::optional("seed_mask", K::Text),
    P::defaulted("n_seeds", int_min(1), D::Int(1)),
    P::defaulted("random_seeds", K::Bool, D::Bool(false)),
    P::defaulted("clean_rounds", int_min(0), D::Int(5)),
];

const NO_PARAMS: &[P] = &[];

const QSIPREP_CONFORM: &[P] = &[P::defaulted(
    "orientation",
    K::OneOf(&["LPS", "RAS", "LAS"]),
    D::Text("LPS"),
)];

const QSIPREP_STEINHARDT: &[P] = &[P::defaulted(
    "order",
    K::IntegerOneOf(&[2, 4, 6, 8]),
    D::Int(8),
)];

const fn action(
    software: Software,
    action: &'static str,
    class: ActionClass,
    params: &'static [P],
) -> ActionSchema {
    ActionSchema {
        software,
        action,
        class,
        params,
        measure_key: None,
    }
}

/// Every action reconflow knows how to plan
pub const BUILTIN_ACTIONS: &[ActionSchema] = &[
    action(Software::DsiStudio, "reconstruction", ActionClass::Reconstruction, DSI_RECONSTRUCTION),
    action(Software::DsiStudio, "export", ActionClass::Export, DSI_EXPORT),
    action(Software::DsiStudio, "tractography", ActionClass::Tractography, DSI_TRACTOGRAPHY),
    action(Software::DsiStudio, "connectivity", ActionClass::Connectivity, DSI_CONNECTIVITY),
    action(Software::DsiStudio, "autotrack", ActionClass::Tractography, DSI_AUTOTRACK),
    action(Software::Mrtrix3, "csd", ActionClass::Reconstruction, MRTRIX_CSD),
    action(
        Software::Mrtrix3,
        "global_tractography",
        ActionClass::Tractography,
        MRTRIX_GLOBAL_TRACTOGRAPHY,
    ),
    action(Software::Mrtrix3, "tractography", ActionClass::Tractography, MRTRIX_TRACTOGRAPHY),
    ActionSchema {
        measure_key: Some("tck2connectome"),
        ..action(Software::Mrtrix3, "connectivity", ActionClass::Connectivity, MRTRIX_CONNECTIVITY)
    },
    action(Software::Dipy, "3dSHORE_reconstruction", ActionClass::Reconstruction, DIPY_SHORE),
    action(Software::Dipy, "MAPMRI_reconstruction", ActionClass::Reconstruction, DIPY_MAPMRI),
    action(Software::Dipy, "DKI_reconstruction", ActionClass::Reconstruction, DIPY_DKI),
    action(Software::Amico, "fit_noddi", ActionClass::Reconstruction, AMICO_NODDI),
    action(Software::PyAfq, "pyafq_tractometry", ActionClass::Tractography, PYAFQ_TRACTOMETRY),
    action(Software::Qsiprep, "controllability", ActionClass::Utility, NO_PARAMS),
    action(Software::Qsiprep, "discard_repeated_samples", ActionClass::Utility, NO_PARAMS),
    action(Software::Qsiprep, "conform", ActionClass::Utility, QSIPREP_CONFORM),
    action(Software::Qsiprep, "mif_to_fib", ActionClass::Utility, NO_PARAMS),
    action(Software::Qsiprep, "reorient_fslstd", ActionClass::Utility, NO_PARAMS),
    action(
        Software::Qsiprep,
        "steinhardt_order_parameters",
        ActionClass::Reconstruction,
        QSIPREP_STEINHARDT,
    ),
];

/// Lookup table from `(software, action)` to its schema
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: BTreeMap<Software, BTreeMap<&'static str, ActionSchema>>,
}

impl SchemaRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            schemas: BTreeMap::new(),
        }
    }

    /// Registry holding every built-in action
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for schema in BUILTIN_ACTIONS {
            registry.register(*schema);
        }
        registry
    }

    /// Add or replace the schema for one action
    pub fn register(&mut self, schema: ActionSchema) {
        self.schemas
            .entry(schema.software)
            .or_default()
            .insert(schema.action, schema);
    }

    /// Schema for a pair, if registered
    pub fn lookup(&self, software: Software, action: &str) -> Option<&ActionSchema> {
        self.schemas.get(&software)?.get(action)
    }

    /// Actions registered for one toolkit, in name order
    pub fn actions_for(&self, software: Software) -> Vec<&'static str> {
        self.schemas
            .get(&software)
            .map(|actions| actions.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.schemas.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_has_every_action() {
        let registry = SchemaRegistry::builtin();
        assert_eq!(registry.len(), BUILTIN_ACTIONS.len());
        assert_eq!(
            registry.actions_for(Software::Mrtrix3),
            vec!["connectivity", "csd", "global_tractography", "tractography"]
        );
    }

    #[test]
    fn test_connectivity_actions_are_flagged() {
        let registry = SchemaRegistry::builtin();
        let mrtrix = registry.lookup(Software::Mrtrix3, "connectivity").unwrap();
        assert!(mrtrix.is_connectivity());
        assert_eq!(mrtrix.measure_key, Some("tck2connectome"));

        let dsi = registry.lookup(Software::DsiStudio, "connectivity").unwrap();
        assert!(dsi.is_connectivity());
        assert_eq!(dsi.measure_key, None);

        let csd = registry.lookup(Software::Mrtrix3, "csd").unwrap();
        assert!(!csd.is_connectivity());
    }

    #[test]
    fn test_unknown_pair_is_absent() {
        let registry = SchemaRegistry::builtin();
        assert!(registry.lookup(Software::Dipy, "csd").is_none());
        assert!(registry.lookup(Software::Amico, "fit_noddi").is_some());
    }

    #[test]
    fn test_lookup_by_owned_action_name() {
        let mut registry = SchemaRegistry::builtin();
        let action = String::from("tractography");
        assert_eq!(registry.lookup(Software::DsiStudio, &action).unwrap().action, "tractography");

        let mut replacement = *registry.lookup(Software::DsiStudio, &action).unwrap();
        replacement.measure_key = Some("connectivity_type");
        registry.register(replacement);
        assert_eq!(registry.len(), BUILTIN_ACTIONS.len());
        assert_eq!(
            registry.lookup(Software::DsiStudio, &action).unwrap().measure_key,
            Some("connectivity_type")
        );
    }
}
