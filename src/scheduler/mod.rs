// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Task scheduling and execution

mod executor;
mod report;
mod runner;
mod state;

pub use executor::{Scheduler, SchedulerOptions};
pub use report::{RunReport, TaskReport};
pub use runner::{read_log_tail, CommandRunner, ProcessRunner, RunOutcome};
pub use state::TaskState;
