// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Engine configuration
//!
//! Loaded from `reconflow.toml`:
//!
//! ```toml
//! workers = 8
//! default_timeout_secs = 86400
//! atlas_dir = "/data/atlases"
//!
//! [timeouts]
//! "MRTrix3:tractography" = 172800
//!
//! [backends.dsi_studio]
//! max_parallel = 1
//!
//! [tools]
//! dsi_studio = "/opt/dsi-studio/dsi_studio"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backends::ToolPaths;
use crate::errors::{ReconflowError, ReconflowResult};
use crate::pipeline::Software;
use crate::scheduler::SchedulerOptions;

/// Name of the configuration file in the platform config directory
pub const CONFIG_FILE: &str = "reconflow.toml";

const DEFAULT_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Worker pool size (defaults to the number of CPUs)
    #[serde(default)]
    pub workers: Option<usize>,

    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Timeouts keyed by `SOFTWARE:action`
    #[serde(default)]
    pub timeouts: BTreeMap<String, u64>,

    /// Per-toolkit settings keyed by toolkit name
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,

    /// Program overrides keyed by tool name
    #[serde(default)]
    pub tools: BTreeMap<String, String>,

    /// Directory holding `atlas-<name>_space-<space>_dseg.nii.gz` images
    #[serde(default)]
    pub atlas_dir: Option<PathBuf>,
}

/// Settings for one toolkit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Maximum concurrent instances of this toolkit
    pub max_parallel: Option<usize>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            timeouts: BTreeMap::new(),
            backends: BTreeMap::new(),
            tools: BTreeMap::new(),
            atlas_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load the configuration.
    ///
    /// An explicit path must exist. Without one, `reconflow.toml` in the
    /// platform config directory is used if present, else the defaults.
    pub fn load(path: Option<&Path>) -> ReconflowResult<Self> {
        match path {
            Some(path) => Self::load_file(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::load_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Platform location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "reconflow", "reconflow").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    fn load_file(path: &Path) -> ReconflowResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ReconflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        debug!("Loading engine configuration from {}", path.display());
        Self::from_toml(&content)
    }

    /// Parse and check a TOML document
    pub fn from_toml(content: &str) -> ReconflowResult<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.normalize()?;
        Ok(config)
    }

    /// Canonicalize toolkit names and reject impossible values
    fn normalize(&mut self) -> ReconflowResult<()> {
        if self.workers == Some(0) {
            return Err(config_error("workers must be at least 1"));
        }
        if self.default_timeout_secs == 0 {
            return Err(config_error("default_timeout_secs must be at least 1"));
        }

        let mut timeouts = BTreeMap::new();
        for (key, secs) in &self.timeouts {
            if *secs == 0 {
                return Err(config_error(format!("timeout for '{}' must be at least 1 second", key)));
            }
            timeouts.insert(normalize_action_key(key)?, *secs);
        }
        self.timeouts = timeouts;

        let mut backends = BTreeMap::new();
        for (name, backend) in &self.backends {
            let software = parse_software(name)?;
            if backend.max_parallel == Some(0) {
                return Err(config_error(format!("backends.{}.max_parallel must be at least 1", name)));
            }
            backends.insert(software.config_key().to_string(), backend.clone());
        }
        self.backends = backends;

        Ok(())
    }

    /// Apply a `SOFTWARE:action=SECONDS` override from the command line
    pub fn apply_timeout_override(&mut self, spec: &str) -> ReconflowResult<()> {
        let (key, secs) = spec
            .rsplit_once('=')
            .ok_or_else(|| config_error(format!("'{}' is not of the form SOFTWARE:ACTION=SECONDS", spec)))?;
        let secs: u64 = secs
            .trim()
            .parse()
            .map_err(|_| config_error(format!("'{}' is not a number of seconds", secs)))?;
        if secs == 0 {
            return Err(config_error(format!("timeout for '{}' must be at least 1 second", key)));
        }
        self.timeouts.insert(normalize_action_key(key.trim())?, secs);
        Ok(())
    }

    /// Scheduler settings derived from this configuration
    pub fn scheduler_options(&self, progress: bool) -> SchedulerOptions {
        let defaults = SchedulerOptions::default();

        let backend_limits: HashMap<Software, usize> = self
            .backends
            .iter()
            .filter_map(|(name, backend)| {
                let software = Software::parse_loose(name)?;
                backend.max_parallel.map(|limit| (software, limit))
            })
            .collect();

        SchedulerOptions {
            workers: self.workers.unwrap_or(defaults.workers),
            default_timeout: Duration::from_secs(self.default_timeout_secs),
            timeouts: self
                .timeouts
                .iter()
                .map(|(key, secs)| (key.clone(), Duration::from_secs(*secs)))
                .collect(),
            backend_limits,
            progress,
        }
    }

    pub fn tool_paths(&self) -> ToolPaths {
        ToolPaths::new(self.tools.clone())
    }
}

fn config_error(message: impl Into<String>) -> ReconflowError {
    ReconflowError::Config {
        message: message.into(),
    }
}

fn parse_software(name: &str) -> ReconflowResult<Software> {
    Software::parse_loose(name).ok_or_else(|| {
        let known: Vec<&str> = Software::ALL.iter().map(|s| s.config_key()).collect();
        config_error(format!("unknown toolkit '{}' (expected one of {})", name, known.join(", ")))
    })
}

/// `dsi_studio:tractography` -> `DSI Studio:tractography`
fn normalize_action_key(key: &str) -> ReconflowResult<String> {
    let (software, action) = key
        .split_once(':')
        .ok_or_else(|| config_error(format!("'{}' is not of the form SOFTWARE:ACTION", key)))?;
    if action.is_empty() {
        return Err(config_error(format!("'{}' names no action", key)));
    }
    Ok(format!("{}:{}", parse_software(software.trim())?, action.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config.default_timeout_secs, 86_400);
        assert!(config.workers.is_none());

        let options = config.scheduler_options(false);
        assert!(options.workers >= 1);
        assert_eq!(options.default_timeout, Duration::from_secs(86_400));
        assert!(options.backend_limits.is_empty());
    }

    #[test]
    fn test_full_document() {
        let config = EngineConfig::from_toml(
            r#"
workers = 4
default_timeout_secs = 3600
atlas_dir = "/data/atlases"

[timeouts]
"mrtrix3:tractography" = 7200

[backends.dsi_studio]
max_parallel = 1

[tools]
dsi_studio = "/opt/dsi/dsi_studio"
"#,
        )
        .unwrap();

        assert_eq!(config.timeouts.get("MRTrix3:tractography"), Some(&7200));
        assert_eq!(config.atlas_dir, Some(PathBuf::from("/data/atlases")));
        assert_eq!(config.tool_paths().program("dsi_studio"), "/opt/dsi/dsi_studio");

        let options = config.scheduler_options(true);
        assert_eq!(options.workers, 4);
        assert_eq!(options.backend_limits.get(&Software::DsiStudio), Some(&1));
        assert_eq!(
            options.timeouts.get("MRTrix3:tractography"),
            Some(&Duration::from_secs(7200))
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(EngineConfig::from_toml("workers = 0").is_err());
        assert!(EngineConfig::from_toml("[backends.freesurfer]\nmax_parallel = 2").is_err());
        assert!(EngineConfig::from_toml("[timeouts]\ntractography = 10").is_err());
        assert!(EngineConfig::from_toml("unknown_key = 1").is_err());
    }

    #[test]
    fn test_timeout_override() {
        let mut config = EngineConfig::default();
        config.apply_timeout_override("DSI Studio:tractography=120").unwrap();
        assert_eq!(config.timeouts.get("DSI Studio:tractography"), Some(&120));

        assert!(config.apply_timeout_override("dsi_studio:tractography").is_err());
        assert!(config.apply_timeout_override("dsi_studio:tractography=soon").is_err());
        assert!(config.apply_timeout_override("nobody:x=5").is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE);
        std::fs::write(&path, "workers = 2\n").unwrap();

        assert_eq!(EngineConfig::load(Some(&path)).unwrap().workers, Some(2));
        assert!(matches!(
            EngineConfig::load(Some(&temp.path().join("missing.toml"))),
            Err(ReconflowError::FileReadError { .. })
        ));
    }
}
