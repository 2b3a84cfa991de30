// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Fingerprints for completion records
//!
//! Uses BLAKE3 over the serialized invocations of a task instance, so any
//! change to program, arguments or declared outputs changes the fingerprint.

use blake3::Hasher;

use crate::backends::InvocationSpec;
use crate::errors::{ReconflowError, ReconflowResult};

/// Incremental fingerprint builder
pub struct Fingerprinter {
    hasher: Hasher,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    /// Fingerprint the planned commands of one task instance
    pub fn hash_invocations(
        mut self,
        invocations: &[InvocationSpec],
    ) -> ReconflowResult<String> {
        for invocation in invocations {
            let json = serde_json::to_string(invocation).map_err(|e| ReconflowError::RecordError {
                message: format!("Failed to serialize invocation '{}': {}", invocation.label, e),
            })?;
            self.hasher.update(json.as_bytes());
            // Separator so [ab, c] and [a, bc] differ
            self.hasher.update(&[0]);
        }
        Ok(self.finalize())
    }

    pub fn finalize(self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

/// Quick hash of a string
pub fn hash_string(s: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(s.as_bytes());
    hasher.finalize().to_hex().to_string()
}
