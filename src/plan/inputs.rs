// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Task inputs
//!
//! Locating the external DWI series and describing what each task instance
//! reads.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::errors::{ReconflowError, ReconflowResult};

/// Files available to one task instance
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskInputs {
    /// The external preprocessed DWI series
    pub source_dwi: PathBuf,
    /// Name of the upstream node, if any
    pub upstream_node: Option<String>,
    /// Outputs of every ancestor instance, nearest ancestor first
    pub upstream: Vec<PathBuf>,
    /// Parcellation image for connectivity instances
    pub atlas: Option<PathBuf>,
    /// Directory holding anatomical derivatives
    pub anat_dir: PathBuf,
    /// Anatomical derivatives the pipeline declares
    pub anatomical: Vec<String>,
}

impl TaskInputs {
    /// The DWI series this task should read: the nearest rewritten series
    /// produced upstream, else the external one
    pub fn dwi(&self) -> &Path {
        self.upstream
            .iter()
            .find(|p| file_name(p).ends_with("_dwi.nii.gz") || file_name(p).ends_with("_dwi.nii"))
            .map(PathBuf::as_path)
            .unwrap_or(&self.source_dwi)
    }

    pub fn bval(&self) -> PathBuf {
        gradient_file(self.dwi(), "bval")
    }

    pub fn bvec(&self) -> PathBuf {
        gradient_file(self.dwi(), "bvec")
    }

    /// First upstream output whose file name ends with `suffix`
    pub fn find(&self, suffix: &str) -> Option<&Path> {
        self.upstream
            .iter()
            .find(|p| file_name(p).ends_with(suffix))
            .map(PathBuf::as_path)
    }

    /// Every upstream output whose file name ends with `suffix`
    pub fn find_all(&self, suffix: &str) -> Vec<&Path> {
        self.upstream
            .iter()
            .filter(|p| file_name(p).ends_with(suffix))
            .map(PathBuf::as_path)
            .collect()
    }

    /// Path of a declared anatomical derivative
    pub fn anatomical_path(&self, name: &str) -> Option<PathBuf> {
        self.anatomical
            .iter()
            .any(|a| a == name)
            .then(|| self.anat_dir.join(format!("{}.mif", name)))
    }
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

/// `sub-01_space-T1w_dwi.nii.gz` -> `sub-01_space-T1w_dwi.<ext>`
fn gradient_file(dwi: &Path, ext: &str) -> PathBuf {
    let name = file_name(dwi);
    let base = name
        .strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .unwrap_or(name);
    dwi.with_file_name(format!("{}.{}", base, ext))
}

/// Find the single preprocessed DWI series for `space` under `input_root`
pub fn locate_dwi(input_root: &Path, space: &str) -> ReconflowResult<PathBuf> {
    let pattern = input_root
        .join("**")
        .join(format!("*space-{}*_dwi.nii*", space))
        .to_string_lossy()
        .to_string();

    let mut matches: Vec<PathBuf> = glob::glob(&pattern)?
        .filter_map(Result::ok)
        .filter(|p| {
            let name = file_name(p);
            p.is_file() && (name.ends_with("_dwi.nii.gz") || name.ends_with("_dwi.nii"))
        })
        .collect();
    matches.sort();

    match matches.len() {
        0 => Err(ReconflowError::NoInputFiles { pattern }),
        1 => Ok(matches.remove(0)),
        _ => Err(ReconflowError::AmbiguousInput { pattern, matches }),
    }
}

/// Conventional location of an atlas image in `atlas_dir`
pub fn atlas_path(atlas_dir: &Path, atlas: &str, space: &str) -> PathBuf {
    atlas_dir.join(format!("atlas-{}_space-{}_dseg.nii.gz", atlas, space))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_locate_single_series() {
        let temp = TempDir::new().unwrap();
        let dwi = temp.path().join("sub-01/dwi/sub-01_space-T1w_desc-preproc_dwi.nii.gz");
        touch(&dwi);
        touch(&temp.path().join("sub-01/dwi/sub-01_space-T1w_desc-preproc_dwi.bval"));
        touch(&temp.path().join("sub-01/dwi/sub-01_space-MNI_desc-preproc_dwi.nii.gz"));

        assert_eq!(locate_dwi(temp.path(), "T1w").unwrap(), dwi);
    }

    #[test]
    fn test_locate_reports_none_and_many() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            locate_dwi(temp.path(), "T1w"),
            Err(ReconflowError::NoInputFiles { .. })
        ));

        touch(&temp.path().join("a/sub-01_space-T1w_dwi.nii.gz"));
        touch(&temp.path().join("b/sub-02_space-T1w_dwi.nii"));
        match locate_dwi(temp.path(), "T1w") {
            Err(ReconflowError::AmbiguousInput { matches, .. }) => assert_eq!(matches.len(), 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_gradients_follow_rewritten_dwi() {
        let mut inputs = TaskInputs {
            source_dwi: PathBuf::from("/in/sub-01_space-T1w_dwi.nii.gz"),
            ..Default::default()
        };
        assert_eq!(inputs.bval(), PathBuf::from("/in/sub-01_space-T1w_dwi.bval"));

        inputs.upstream = vec![
            PathBuf::from("/out/conform/space-T1w_desc-lps_dwi.nii.gz"),
            PathBuf::from("/out/conform/space-T1w_desc-lps_dwi.bvec"),
        ];
        assert_eq!(inputs.bvec(), PathBuf::from("/out/conform/space-T1w_desc-lps_dwi.bvec"));
        assert!(inputs.find(".fib.gz").is_none());
    }

    #[test]
    fn test_anatomical_must_be_declared() {
        let inputs = TaskInputs {
            anat_dir: PathBuf::from("/in/anat"),
            anatomical: vec!["mrtrix_5tt_hsvs".into()],
            ..Default::default()
        };
        assert_eq!(
            inputs.anatomical_path("mrtrix_5tt_hsvs"),
            Some(PathBuf::from("/in/anat/mrtrix_5tt_hsvs.mif"))
        );
        assert_eq!(inputs.anatomical_path("mrtrix_5tt_fast"), None);
    }
}
