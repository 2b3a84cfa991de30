// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Pipeline definitions and loading
//!
//! Raw documents, their validation into a typed [`PipelineSpec`], the
//! dependency [`Forest`] and the loader that ties them together.

mod dag;
mod definition;
mod document;
mod loader;
mod validation;

pub use dag::Forest;
pub use definition::*;
pub use document::{prepackaged_names, DocumentSource, PipelineDocument};
pub use loader::{LoadedPipeline, PipelineLoader};
pub use validation::{is_qualifier_safe, is_valid_node_name, SchemaOutcome, SchemaValidator};
