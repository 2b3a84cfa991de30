// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! # reconflow - Diffusion MRI Reconstruction Workflows
//!
//! `reconflow` runs declarative reconstruction pipelines over a
//! preprocessed diffusion MRI series. A pipeline is a forest of nodes, each
//! one action of an external toolkit (MRtrix3, DSI Studio, Dipy, AMICO,
//! pyAFQ) fed by its parent's outputs.
//!
//! ## Features
//!
//! - **Load-time validation** - Every schema, graph and parameter problem is
//!   reported at once, before anything runs
//! - **Atlas expansion** - Connectivity nodes fan out to one task per atlas
//!   and measure
//! - **Failure isolation** - A failed task cancels its own subtree only
//! - **Idempotent re-runs** - Completed artifacts are reused
//!
//! ## Quick Start
//!
//! ```bash
//! # List the bundled pipelines
//! reconflow pipelines
//!
//! # Check a pipeline document
//! reconflow validate my_pipeline.json
//!
//! # Run a pipeline
//! reconflow run mrtrix_multishell_msmt --input-root sub-01 --output-root out
//! ```

pub mod artifacts;
pub mod backends;
pub mod cli;
pub mod config;
pub mod errors;
pub mod params;
pub mod pipeline;
pub mod plan;
pub mod scheduler;
pub mod utils;

// Re-export commonly used types
pub use config::EngineConfig;
pub use errors::{ReconflowError, ReconflowResult};
pub use pipeline::{LoadedPipeline, PipelineDocument, PipelineLoader, PipelineSpec};
pub use plan::{ExecutionPlan, Planner};
pub use scheduler::{RunReport, Scheduler};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
