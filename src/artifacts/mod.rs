// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Artifact management
//!
//! Names every task instance's outputs, decides whether an instance's
//! artifacts can be reused from an earlier run, and writes completion
//! records after success.

mod hash;
mod records;

pub use hash::{hash_string, Fingerprinter};
pub use records::FilesystemRecords;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

use crate::backends::InvocationSpec;
use crate::errors::{ReconflowError, ReconflowResult};
use crate::plan::Qualifier;

/// Storage for completion records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Record for an artifact stem
    async fn get(&self, stem: &Path) -> Result<Option<CompletionRecord>, ReconflowError>;

    async fn store(&self, record: &CompletionRecord) -> Result<(), ReconflowError>;

    async fn invalidate(&self, stem: &Path) -> Result<(), ReconflowError>;

    /// Remove every record
    async fn clear(&self) -> Result<(), ReconflowError>;

    async fn stats(&self) -> Result<RecordStats, ReconflowError>;
}

/// Written after a task instance succeeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub timestamp: SystemTime,
    /// Task label, `node` or `node[qualifier]`
    pub task: String,
    pub stem: PathBuf,
    /// Fingerprint of the invocations that produced the outputs
    pub fingerprint: String,
    pub outputs: Vec<PathBuf>,
    pub duration_ms: u64,
}

/// Record store statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordStats {
    pub entries: usize,
    pub size_bytes: u64,
    pub oldest_entry: Option<SystemTime>,
    pub newest_entry: Option<SystemTime>,
}

impl RecordStats {
    /// Format size for display
    pub fn formatted_size(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if self.size_bytes >= GB {
            format!("{:.2} GB", self.size_bytes as f64 / GB as f64)
        } else if self.size_bytes >= MB {
            format!("{:.2} MB", self.size_bytes as f64 / MB as f64)
        } else if self.size_bytes >= KB {
            format!("{:.2} KB", self.size_bytes as f64 / KB as f64)
        } else {
            format!("{} bytes", self.size_bytes)
        }
    }
}

/// Owns the output tree of one run
pub struct ArtifactManager {
    output_root: PathBuf,
    space: String,
    records: Box<dyn RecordStore>,
}

impl ArtifactManager {
    /// Manager with records under `<output_root>/.reconflow/records`
    pub fn new(output_root: impl Into<PathBuf>, space: impl Into<String>) -> Self {
        let output_root = output_root.into();
        let records = Box::new(FilesystemRecords::for_output_root(&output_root));
        Self::with_store(output_root, space, records)
    }

    pub fn with_store(
        output_root: impl Into<PathBuf>,
        space: impl Into<String>,
        records: Box<dyn RecordStore>,
    ) -> Self {
        Self {
            output_root: output_root.into(),
            space: space.into(),
            records,
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn records(&self) -> &dyn RecordStore {
        self.records.as_ref()
    }

    /// Artifact stem of one task instance:
    /// `<root>/<node>/space-<space>[_desc-<suffix>][_atlas-<a>][_measure-<m>]`.
    ///
    /// Injective over (node, qualifier) because node names are unique and
    /// atlas and measure identifiers never contain `-`.
    pub fn stem(&self, node: &str, suffix: &str, qualifier: Option<&Qualifier>) -> PathBuf {
        let mut name = format!("space-{}", self.space);
        if !suffix.is_empty() {
            name.push_str(&format!("_desc-{}", suffix));
        }
        if let Some(qualifier) = qualifier {
            name.push('_');
            name.push_str(&qualifier.to_string());
        }
        self.output_root.join(node).join(name)
    }

    /// Whether a task instance's outputs from an earlier run can be kept.
    ///
    /// Every output must be a valid artifact, and a completion record, if
    /// present, must carry the same fingerprint.
    pub async fn is_reusable(
        &self,
        stem: &Path,
        outputs: &[PathBuf],
        fingerprint: &str,
    ) -> ReconflowResult<bool> {
        if outputs.is_empty() || !missing_outputs(outputs).await.is_empty() {
            return Ok(false);
        }

        match self.records.get(stem).await {
            Ok(Some(record)) if record.fingerprint != fingerprint => {
                debug!("Parameters of {} changed since its outputs were written", stem.display());
                Ok(false)
            }
            Ok(_) => Ok(true),
            // A corrupt record cannot vouch for anything
            Err(_) => Ok(false),
        }
    }

    /// Create working and log directories for a task's invocations
    pub async fn prepare(&self, invocations: &[InvocationSpec]) -> ReconflowResult<()> {
        for invocation in invocations {
            create_dir(&invocation.working_dir).await?;
            if let Some(log_dir) = invocation.log_path.parent() {
                create_dir(log_dir).await?;
            }
            for output in &invocation.expected_outputs {
                if let Some(parent) = output.parent() {
                    create_dir(parent).await?;
                }
            }
        }
        Ok(())
    }

    /// Record a successful task instance
    pub async fn complete(
        &self,
        task: &str,
        stem: &Path,
        fingerprint: &str,
        outputs: &[PathBuf],
        duration: Duration,
    ) -> ReconflowResult<()> {
        self.records
            .store(&CompletionRecord {
                timestamp: SystemTime::now(),
                task: task.to_string(),
                stem: stem.to_path_buf(),
                fingerprint: fingerprint.to_string(),
                outputs: outputs.to_vec(),
                duration_ms: duration.as_millis() as u64,
            })
            .await
    }
}

async fn create_dir(dir: &Path) -> ReconflowResult<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ReconflowError::FileWriteError {
            path: dir.to_path_buf(),
            error: e.to_string(),
        })
}

/// Declared outputs that are not valid artifacts
pub async fn missing_outputs(outputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut missing = Vec::new();
    for output in outputs {
        if !is_valid_artifact(output).await {
            missing.push(output.clone());
        }
    }
    missing
}

/// A regular, non-empty, readable file
pub async fn is_valid_artifact(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => tokio::fs::File::open(path).await.is_ok(),
        _ => false,
    }
}
