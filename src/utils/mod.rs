// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Utility modules
//!
//! Terminal styling and progress indicators shared by the CLI and the
//! scheduler.

pub mod colors;
pub mod spinner;

pub use colors::*;
pub use spinner::*;
