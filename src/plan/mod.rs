// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Execution planning
//!
//! Turns a loaded pipeline into concrete task instances: one per node, or
//! one per atlas and measure for connectivity nodes. Each instance carries
//! its resolved inputs, its artifact stem and the commands its backend
//! adapter planned for it.

mod atlas;
mod inputs;

pub use atlas::{expand, ExpandedInstance, Qualifier};
pub use inputs::{atlas_path, locate_dwi, TaskInputs};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::artifacts::{ArtifactManager, Fingerprinter};
use crate::backends::{AdapterRegistry, InvocationSpec, PlanContext, ToolPaths};
use crate::errors::{ReconflowError, ReconflowResult};
use crate::params::ResolvedParams;
use crate::pipeline::{LoadedPipeline, Software};

/// Index of a task instance in its plan; plan order is a topological order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(pub usize);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One schedulable unit of work
#[derive(Debug, Clone, Serialize)]
pub struct TaskInstance {
    pub id: TaskId,
    /// Declaration index of the node this instance belongs to
    pub node_index: usize,
    pub node: String,
    pub software: Software,
    pub action: String,
    pub qualifier: Option<Qualifier>,
    pub params: ResolvedParams,
    pub inputs: TaskInputs,
    pub stem: PathBuf,
    /// Commands to run, in order
    pub invocations: Vec<InvocationSpec>,
    /// Fingerprint of `invocations`, stored in completion records
    pub fingerprint: String,
    /// Every instance of the parent node
    pub depends_on: Vec<TaskId>,
    /// Node names from the tree root down to this node
    pub ancestry: Vec<String>,
}

impl TaskInstance {
    /// `node`, or `node[atlas-x_measure-y]` for expanded instances
    pub fn label(&self) -> String {
        task_label(&self.node, self.qualifier.as_ref())
    }

    /// Union of the declared outputs of every invocation
    pub fn expected_outputs(&self) -> Vec<PathBuf> {
        let mut outputs: Vec<PathBuf> = Vec::new();
        for output in self.invocations.iter().flat_map(|i| &i.expected_outputs) {
            if !outputs.contains(output) {
                outputs.push(output.clone());
            }
        }
        outputs
    }

    /// `software:action`, the key used for timeouts
    pub fn action_key(&self) -> String {
        format!("{}:{}", self.software, self.action)
    }
}

fn task_label(node: &str, qualifier: Option<&Qualifier>) -> String {
    match qualifier {
        Some(q) => format!("{}[{}]", node, q),
        None => node.to_string(),
    }
}

/// Every task instance of a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub pipeline: String,
    pub tasks: Vec<TaskInstance>,
    #[serde(skip)]
    children: HashMap<TaskId, Vec<TaskId>>,
}

impl ExecutionPlan {
    pub fn new(pipeline: impl Into<String>, tasks: Vec<TaskInstance>) -> Self {
        let mut children: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for task in &tasks {
            for parent in &task.depends_on {
                children.entry(*parent).or_default().push(task.id);
            }
        }
        Self {
            pipeline: pipeline.into(),
            tasks,
            children,
        }
    }

    pub fn task(&self, id: TaskId) -> &TaskInstance {
        &self.tasks[id.0]
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Instances that depend directly on `id`
    pub fn children(&self, id: TaskId) -> &[TaskId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every instance below `id`, in plan order
    pub fn descendants(&self, id: TaskId) -> Vec<TaskId> {
        let mut found = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for &child in self.children(current) {
                if !found.contains(&child) {
                    found.push(child);
                    stack.push(child);
                }
            }
        }
        found.sort();
        found
    }

    /// Instances of one node
    pub fn instances_of(&self, node: &str) -> Vec<&TaskInstance> {
        self.tasks.iter().filter(|t| t.node == node).collect()
    }
}

/// Where a run reads its external inputs from
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub source_dwi: PathBuf,
    pub atlas_dir: PathBuf,
    pub anat_dir: PathBuf,
}

impl RunInputs {
    /// Locate the DWI series under `input_root`.
    ///
    /// Anatomical derivatives are read from the subject's `anat` directory
    /// next to the DWI's directory. Atlases default to `<input_root>/atlases`.
    pub fn locate(input_root: &Path, space: &str, atlas_dir: Option<&Path>) -> ReconflowResult<Self> {
        let source_dwi = locate_dwi(input_root, space)?;
        let anat_dir = source_dwi
            .parent()
            .and_then(Path::parent)
            .map(|subject| subject.join("anat"))
            .unwrap_or_else(|| input_root.join("anat"));

        Ok(Self {
            source_dwi,
            atlas_dir: atlas_dir
                .map(Path::to_path_buf)
                .unwrap_or_else(|| input_root.join("atlases")),
            anat_dir,
        })
    }
}

/// Builds an [`ExecutionPlan`] from a loaded pipeline
pub struct Planner<'a> {
    adapters: &'a AdapterRegistry,
    artifacts: &'a ArtifactManager,
    tools: &'a ToolPaths,
    inputs: &'a RunInputs,
}

impl<'a> Planner<'a> {
    pub fn new(
        adapters: &'a AdapterRegistry,
        artifacts: &'a ArtifactManager,
        tools: &'a ToolPaths,
        inputs: &'a RunInputs,
    ) -> Self {
        Self {
            adapters,
            artifacts,
            tools,
            inputs,
        }
    }

    /// Plan every task instance, collecting all planning errors.
    ///
    /// Nodes below a node that failed to plan are skipped silently; the
    /// root cause is already in the error list.
    pub fn plan(&self, pipeline: &LoadedPipeline) -> ReconflowResult<ExecutionPlan> {
        let spec = &pipeline.spec;
        let mut tasks: Vec<TaskInstance> = Vec::new();
        let mut node_tasks: HashMap<usize, Vec<TaskId>> = HashMap::new();
        let mut errors = Vec::new();

        for (idx, node) in pipeline.nodes_in_order() {
            let Some(adapter) = self.adapters.get(node.software) else {
                errors.push(ReconflowError::UnsupportedAction {
                    node: node.name.clone(),
                    software: node.software.to_string(),
                    action: node.action.clone(),
                    help: Some("No backend adapter is registered for this toolkit".into()),
                });
                continue;
            };

            let (depends_on, upstream) = match pipeline.forest.parent(idx) {
                None => (Vec::new(), Vec::new()),
                Some(parent) => match node_tasks.get(&parent) {
                    Some(ids) => (ids.clone(), upstream_of(&tasks, ids)),
                    None => continue,
                },
            };

            let ancestry: Vec<String> = pipeline
                .forest
                .ancestry(idx)
                .into_iter()
                .map(str::to_string)
                .collect();

            let instances = expand(pipeline.schema(idx), pipeline.params(idx), &spec.atlases);
            let mut planned = Vec::with_capacity(instances.len());
            let mut node_failed = false;

            for instance in instances {
                let inputs = TaskInputs {
                    source_dwi: self.inputs.source_dwi.clone(),
                    upstream_node: node.parent().map(str::to_string),
                    upstream: upstream.clone(),
                    atlas: instance
                        .qualifier
                        .as_ref()
                        .map(|q| atlas_path(&self.inputs.atlas_dir, &q.atlas, &spec.space)),
                    anat_dir: self.inputs.anat_dir.clone(),
                    anatomical: spec.anatomical.clone(),
                };
                let stem = self
                    .artifacts
                    .stem(&node.name, &node.output_suffix, instance.qualifier.as_ref());
                let label = task_label(&node.name, instance.qualifier.as_ref());

                let ctx = PlanContext {
                    node,
                    params: &instance.params,
                    qualifier: instance.qualifier.as_ref(),
                    inputs: &inputs,
                    stem: &stem,
                    task_label: &label,
                    tools: self.tools,
                };

                let invocations = match adapter.plan(&ctx) {
                    Ok(invocations) => invocations,
                    Err(e) => {
                        errors.push(e);
                        node_failed = true;
                        // Every instance shares the node's structure; one error is enough
                        break;
                    }
                };
                let fingerprint = match Fingerprinter::new().hash_invocations(&invocations) {
                    Ok(fingerprint) => fingerprint,
                    Err(e) => {
                        errors.push(e);
                        node_failed = true;
                        break;
                    }
                };

                let id = TaskId(tasks.len() + planned.len());
                debug!("Planned {} as {} with {} command(s)", label, id, invocations.len());
                planned.push(TaskInstance {
                    id,
                    node_index: idx,
                    node: node.name.clone(),
                    software: node.software,
                    action: node.action.clone(),
                    qualifier: instance.qualifier,
                    params: instance.params,
                    inputs,
                    stem,
                    invocations,
                    fingerprint,
                    depends_on: depends_on.clone(),
                    ancestry: ancestry.clone(),
                });
            }

            if node_failed {
                continue;
            }
            node_tasks.insert(idx, planned.iter().map(|t| t.id).collect());
            tasks.extend(planned);
        }

        if !errors.is_empty() {
            return Err(ReconflowError::validation(errors));
        }

        Ok(ExecutionPlan::new(spec.name.clone(), tasks))
    }
}

/// Files a child of `parents` can read: the parents' outputs, then
/// everything their own ancestors produced
fn upstream_of(tasks: &[TaskInstance], parents: &[TaskId]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = parents
        .iter()
        .flat_map(|id| tasks[id.0].expected_outputs())
        .collect();
    if let Some(first) = parents.first() {
        files.extend(tasks[first.0].inputs.upstream.iter().cloned());
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SchemaRegistry;
    use crate::pipeline::{PipelineDocument, PipelineLoader};
    use serde_json::json;

    fn run_inputs() -> RunInputs {
        RunInputs {
            source_dwi: PathBuf::from("/in/sub-01/dwi/sub-01_space-T1w_desc-preproc_dwi.nii.gz"),
            atlas_dir: PathBuf::from("/atlases"),
            anat_dir: PathBuf::from("/in/sub-01/anat"),
        }
    }

    fn plan_document(document: &PipelineDocument) -> ReconflowResult<ExecutionPlan> {
        let registry = SchemaRegistry::builtin();
        let pipeline = PipelineLoader::new(&registry).load(document)?;
        let adapters = AdapterRegistry::with_builtin();
        let artifacts = ArtifactManager::new("/out", pipeline.spec.space.clone());
        let tools = ToolPaths::default();
        let inputs = run_inputs();
        Planner::new(&adapters, &artifacts, &tools, &inputs).plan(&pipeline)
    }

    #[test]
    fn test_every_prepackaged_pipeline_plans() {
        for name in crate::pipeline::prepackaged_names() {
            let document = PipelineDocument::prepackaged(name).unwrap();
            if let Err(e) = plan_document(&document) {
                panic!("{name} failed to plan: {e:?}");
            }
        }
    }

    #[test]
    fn test_connectivity_expands_after_tractography() {
        let document = PipelineDocument::prepackaged("mrtrix_multishell_msmt").unwrap();
        let plan = plan_document(&document).unwrap();

        assert_eq!(plan.len(), 30);
        assert_eq!(plan.tasks[0].node, "msmt_csd");
        assert_eq!(plan.tasks[1].depends_on, vec![TaskId(0)]);

        let connectivity = plan.instances_of("mrtrix_conn");
        assert_eq!(connectivity.len(), 28);
        assert!(connectivity.iter().all(|t| t.depends_on == vec![TaskId(1)]));
        assert_eq!(plan.children(TaskId(1)).len(), 28);
        assert_eq!(plan.descendants(TaskId(0)).len(), 29);

        let first = connectivity[0];
        assert_eq!(first.ancestry, vec!["msmt_csd", "track_ifod2", "mrtrix_conn"]);
        assert_eq!(
            first.inputs.atlas,
            Some(PathBuf::from("/atlases/atlas-schaefer100_space-T1w_dseg.nii.gz"))
        );
        assert!(first.label().starts_with("mrtrix_conn[atlas-schaefer100_measure-"));
        // Tracks and SIFT2 weights come from the parent, the FODs from further up
        assert!(first.inputs.find(".tck").is_some());
        assert!(first.inputs.find("_wmFOD.mif").is_some());
    }

    #[test]
    fn test_task_ids_are_topological() {
        let document = PipelineDocument::prepackaged("dsi_studio_gqi").unwrap();
        let plan = plan_document(&document).unwrap();

        for task in &plan.tasks {
            assert!(task.depends_on.iter().all(|parent| *parent < task.id));
        }
    }

    #[test]
    fn test_stems_are_distinct() {
        let document = PipelineDocument::prepackaged("mrtrix_singleshell_ss3t").unwrap();
        let plan = plan_document(&document).unwrap();

        let mut stems: Vec<_> = plan.tasks.iter().map(|t| t.stem.clone()).collect();
        stems.sort();
        stems.dedup();
        assert_eq!(stems.len(), plan.len());
    }

    #[test]
    fn test_incompatible_lineage_is_a_planning_error() {
        let document = PipelineDocument::from_value(json!({
            "name": "bad_lineage",
            "space": "T1w",
            "nodes": [
                {"name": "noddi", "software": "AMICO", "action": "fit_noddi",
                 "output_suffix": "noddi", "input": "qsiprep"},
                {"name": "trk", "software": "MRTrix3", "action": "tractography",
                 "output_suffix": "trk", "input": "noddi",
                 "parameters": {"tckgen": {"algorithm": "iFOD2"}}},
                {"name": "export", "software": "DSI Studio", "action": "export",
                 "output_suffix": "exp", "input": "trk"}
            ]
        }));

        let err = plan_document(&document).unwrap_err();
        // The export below the broken node is skipped, not reported twice
        let errors = err.into_errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ReconflowError::IncompatibleInput { .. }));
    }
}
