// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Filesystem-backed completion records
//!
//! Stores one JSON file per artifact stem under
//! `<output_root>/.reconflow/records/`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::hash::hash_string;
use super::{CompletionRecord, RecordStats, RecordStore};
use crate::errors::ReconflowError;

/// Completion records kept next to the outputs
pub struct FilesystemRecords {
    records_dir: PathBuf,
}

impl FilesystemRecords {
    pub fn new(records_dir: PathBuf) -> Self {
        Self { records_dir }
    }

    /// Records for an output root
    pub fn for_output_root(output_root: &Path) -> Self {
        Self::new(output_root.join(".reconflow").join("records"))
    }

    pub fn dir(&self) -> &Path {
        &self.records_dir
    }

    /// Get path for a record
    fn record_path(&self, stem: &Path) -> PathBuf {
        let key = hash_string(&stem.to_string_lossy());
        // First 2 chars as a directory keep listings short
        let (prefix, rest) = key.split_at(2.min(key.len()));
        self.records_dir.join(prefix).join(format!("{}.json", rest))
    }

    async fn list_records(&self) -> Result<Vec<CompletionRecord>, ReconflowError> {
        let mut records = Vec::new();

        if !self.records_dir.exists() {
            return Ok(records);
        }

        let mut prefixes = tokio::fs::read_dir(&self.records_dir)
            .await
            .map_err(|e| record_error("read records directory", e))?;

        while let Some(prefix) = prefixes
            .next_entry()
            .await
            .map_err(|e| record_error("read records directory", e))?
        {
            let prefix = prefix.path();
            if !prefix.is_dir() {
                continue;
            }

            let mut files = tokio::fs::read_dir(&prefix)
                .await
                .map_err(|e| record_error("read records subdirectory", e))?;
            while let Some(file) = files
                .next_entry()
                .await
                .map_err(|e| record_error("read record file", e))?
            {
                let file = file.path();
                if file.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }

                // Unreadable records are treated as absent
                if let Ok(content) = tokio::fs::read_to_string(&file).await {
                    if let Ok(record) = serde_json::from_str::<CompletionRecord>(&content) {
                        records.push(record);
                    }
                }
            }
        }

        Ok(records)
    }

    /// Calculate directory size recursively
    fn dir_size(path: &Path) -> Result<u64, ReconflowError> {
        if path.is_file() {
            return Ok(path.metadata().map(|m| m.len()).unwrap_or(0));
        }

        let mut size = 0;
        for entry in std::fs::read_dir(path).map_err(|e| record_error("read directory", e))? {
            let entry = entry.map_err(|e| record_error("read entry", e))?;
            let path = entry.path();
            if path.is_dir() {
                size += Self::dir_size(&path)?;
            } else {
                size += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }

        Ok(size)
    }
}

fn record_error(what: &str, e: impl std::fmt::Display) -> ReconflowError {
    ReconflowError::RecordError {
        message: format!("Failed to {}: {}", what, e),
    }
}

#[async_trait]
impl RecordStore for FilesystemRecords {
    async fn get(&self, stem: &Path) -> Result<Option<CompletionRecord>, ReconflowError> {
        let path = self.record_path(stem);
        if !path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| record_error("read completion record", e))?;
        let record = serde_json::from_str(&content)
            .map_err(|e| record_error("parse completion record", e))?;

        Ok(Some(record))
    }

    async fn store(&self, record: &CompletionRecord) -> Result<(), ReconflowError> {
        let path = self.record_path(&record.stem);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| record_error("create records directory", e))?;
        }

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| record_error("serialize completion record", e))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| record_error("write completion record", e))?;

        Ok(())
    }

    async fn invalidate(&self, stem: &Path) -> Result<(), ReconflowError> {
        let path = self.record_path(stem);
        if path.exists() {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| record_error("remove completion record", e))?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), ReconflowError> {
        if self.records_dir.exists() {
            tokio::fs::remove_dir_all(&self.records_dir)
                .await
                .map_err(|e| record_error("clear records", e))?;
            tokio::fs::create_dir_all(&self.records_dir)
                .await
                .map_err(|e| record_error("recreate records directory", e))?;
        }
        Ok(())
    }

    async fn stats(&self) -> Result<RecordStats, ReconflowError> {
        let records = self.list_records().await?;

        let mut stats = RecordStats {
            entries: records.len(),
            ..Default::default()
        };
        let timestamps: Vec<SystemTime> = records.iter().map(|r| r.timestamp).collect();
        stats.oldest_entry = timestamps.iter().min().copied();
        stats.newest_entry = timestamps.iter().max().copied();

        if self.records_dir.exists() {
            stats.size_bytes = Self::dir_size(&self.records_dir)?;
        }

        Ok(stats)
    }
}
