// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Scheduler
//!
//! Dispatches ready task instances into a bounded worker pool, runs their
//! invocations and propagates failures down the forest. Unrelated trees
//! keep running when one fails.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::report::{RunReport, TaskReport};
use super::runner::{read_log_tail, CommandRunner, RunOutcome};
use super::TaskState;
use crate::artifacts::{missing_outputs, ArtifactManager};
use crate::errors::{BackendFailure, ReconflowError, ReconflowResult};
use crate::pipeline::Software;
use crate::plan::{ExecutionPlan, TaskId, TaskInstance};
use crate::utils::create_progress_bar;

/// Lines of a failed command's log quoted in its error
const LOG_TAIL_LINES: usize = 20;

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Worker pool size
    pub workers: usize,
    pub default_timeout: Duration,
    /// Per `software:action` timeouts
    pub timeouts: HashMap<String, Duration>,
    /// Optional per-toolkit concurrency limits inside the pool
    pub backend_limits: HashMap<Software, usize>,
    /// Show a progress bar
    pub progress: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            default_timeout: Duration::from_secs(24 * 60 * 60),
            timeouts: HashMap::new(),
            backend_limits: HashMap::new(),
            progress: false,
        }
    }
}

impl SchedulerOptions {
    pub fn timeout_for(&self, task: &TaskInstance) -> Duration {
        self.timeouts
            .get(&task.action_key())
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

/// How a dispatched task instance ended
#[derive(Debug)]
enum TaskOutcome {
    Succeeded { reused: bool },
    Failed(ReconflowError),
    Cancelled,
}

/// Runs execution plans
pub struct Scheduler {
    runner: Arc<dyn CommandRunner>,
    artifacts: Arc<ArtifactManager>,
    options: SchedulerOptions,
}

/// Mutable bookkeeping of one run
struct RunState {
    states: Vec<TaskState>,
    reports: Vec<TaskReport>,
    waiting_on: Vec<usize>,
    ready: BTreeSet<TaskId>,
    progress: ProgressBar,
}

impl RunState {
    fn new(plan: &ExecutionPlan, progress: ProgressBar) -> Self {
        let reports = plan
            .tasks
            .iter()
            .map(|task| TaskReport {
                id: task.id,
                task: task.label(),
                node: task.node.clone(),
                software: task.software,
                action: task.action.clone(),
                qualifier: task.qualifier.clone(),
                state: TaskState::Pending,
                cause: None,
                error_kind: None,
                failure: None,
                ancestry: task.ancestry.clone(),
                outputs: task.expected_outputs(),
                reused: false,
                duration_secs: 0.0,
            })
            .collect();

        let mut run = Self {
            states: vec![TaskState::Pending; plan.len()],
            reports,
            waiting_on: plan.tasks.iter().map(|t| t.depends_on.len()).collect(),
            ready: BTreeSet::new(),
            progress,
        };
        for task in &plan.tasks {
            if task.depends_on.is_empty() {
                run.transition(task.id, TaskState::Ready);
            }
        }
        run
    }

    fn state(&self, id: TaskId) -> TaskState {
        self.states[id.0]
    }

    fn transition(&mut self, id: TaskId, next: TaskState) {
        let current = self.states[id.0];
        if !current.can_become(next) {
            warn!("Ignoring transition {} -> {} for {}", current, next, self.reports[id.0].task);
            return;
        }

        self.states[id.0] = next;
        self.reports[id.0].state = next;
        match next {
            TaskState::Ready => {
                self.ready.insert(id);
            }
            TaskState::Running => {
                self.ready.remove(&id);
            }
            _ if next.is_terminal() => {
                self.ready.remove(&id);
                self.progress.inc(1);
            }
            _ => {}
        }
    }

    fn cancel(&mut self, id: TaskId, cause: ReconflowError) {
        if self.state(id).is_terminal() {
            return;
        }
        self.transition(id, TaskState::Cancelled);
        self.reports[id.0].set_cause(&cause);
    }

    fn succeed(&mut self, plan: &ExecutionPlan, id: TaskId) {
        self.transition(id, TaskState::Succeeded);
        for &child in plan.children(id) {
            self.waiting_on[child.0] = self.waiting_on[child.0].saturating_sub(1);
            if self.waiting_on[child.0] == 0 && self.state(child) == TaskState::Pending {
                self.transition(child, TaskState::Ready);
            }
        }
    }

    fn fail(&mut self, plan: &ExecutionPlan, id: TaskId, error: ReconflowError) {
        self.transition(id, TaskState::Failed);
        self.reports[id.0].set_cause(&error);

        let ancestor = self.reports[id.0].task.clone();
        for descendant in plan.descendants(id) {
            let cause = ReconflowError::DependencyFailed {
                task: self.reports[descendant.0].task.clone(),
                ancestor: ancestor.clone(),
            };
            self.cancel(descendant, cause);
        }
    }

    /// Cancel everything that has not started
    fn abort_pending(&mut self) {
        for idx in 0..self.states.len() {
            if matches!(self.states[idx], TaskState::Pending | TaskState::Ready) {
                let cause = ReconflowError::Aborted {
                    task: self.reports[idx].task.clone(),
                };
                self.cancel(TaskId(idx), cause);
            }
        }
    }
}

impl Scheduler {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        artifacts: Arc<ArtifactManager>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            runner,
            artifacts,
            options,
        }
    }

    /// Run every task instance of `plan` until each reaches a terminal state.
    ///
    /// Cancelling `cancel` kills running processes and cancels everything
    /// that has not started yet.
    pub async fn run(&self, plan: &ExecutionPlan, cancel: CancellationToken) -> RunReport {
        let started = Instant::now();
        let progress = if self.options.progress {
            create_progress_bar(plan.len() as u64, &plan.pipeline)
        } else {
            ProgressBar::hidden()
        };
        let mut run = RunState::new(plan, progress);

        let pool = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let backend_pools: HashMap<Software, Arc<Semaphore>> = self
            .options
            .backend_limits
            .iter()
            .map(|(software, limit)| (*software, Arc::new(Semaphore::new((*limit).max(1)))))
            .collect();

        let mut running: JoinSet<(TaskId, TaskOutcome, Duration)> = JoinSet::new();
        let mut aborted = false;

        info!(
            "Running pipeline '{}': {} task instance(s), {} worker(s)",
            plan.pipeline,
            plan.len(),
            self.options.workers
        );

        loop {
            if cancel.is_cancelled() && !aborted {
                warn!("Run aborted; cancelling every task that has not started");
                aborted = true;
                run.abort_pending();
            }

            if !aborted {
                self.dispatch(plan, &mut run, &pool, &backend_pools, &mut running, &cancel);
            }

            if running.is_empty() {
                break;
            }

            let joined = tokio::select! {
                joined = running.join_next() => joined,
                _ = cancel.cancelled(), if !aborted => continue,
            };

            match joined {
                Some(Ok((id, outcome, elapsed))) => {
                    run.reports[id.0].duration_secs = elapsed.as_secs_f64();
                    self.apply(plan, &mut run, id, outcome);
                }
                Some(Err(e)) => warn!("Task supervisor stopped unexpectedly: {}", e),
                None => break,
            }
        }

        // Anything left over could never be scheduled
        for idx in 0..run.states.len() {
            if !run.states[idx].is_terminal() {
                let cause = ReconflowError::Aborted {
                    task: run.reports[idx].task.clone(),
                };
                run.cancel(TaskId(idx), cause);
            }
        }
        run.progress.finish_and_clear();

        RunReport::new(plan.pipeline.clone(), run.reports, started.elapsed(), aborted)
    }

    /// Start every ready task that can get a worker, in plan order
    fn dispatch(
        &self,
        plan: &ExecutionPlan,
        run: &mut RunState,
        pool: &Arc<Semaphore>,
        backend_pools: &HashMap<Software, Arc<Semaphore>>,
        running: &mut JoinSet<(TaskId, TaskOutcome, Duration)>,
        cancel: &CancellationToken,
    ) {
        let candidates: Vec<TaskId> = run.ready.iter().copied().collect();

        for id in candidates {
            let task = plan.task(id);

            let Ok(worker) = pool.clone().try_acquire_owned() else {
                break;
            };
            let backend_permit = match backend_pools.get(&task.software) {
                Some(limit) => match limit.clone().try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    // Another toolkit may still have room
                    Err(_) => continue,
                },
                None => None,
            };

            run.transition(id, TaskState::Running);
            debug!("Dispatching {}", task.label());

            let permits = (worker, backend_permit);
            let task = task.clone();
            let label = task.label();
            let runner = self.runner.clone();
            let artifacts = self.artifacts.clone();
            let timeout = self.options.timeout_for(&task);
            let cancel = cancel.clone();

            running.spawn(async move {
                let started = Instant::now();
                let inner = tokio::spawn(execute_task(task, runner, artifacts, timeout, cancel));
                let outcome = match inner.await {
                    Ok(outcome) => outcome,
                    Err(e) => TaskOutcome::Failed(ReconflowError::BackendExecution {
                        task: label,
                        kind: BackendFailure::Internal,
                        reason: format!("task supervisor panicked: {}", e),
                        help: None,
                    }),
                };
                drop(permits);
                (id, outcome, started.elapsed())
            });
        }
    }

    fn apply(&self, plan: &ExecutionPlan, run: &mut RunState, id: TaskId, outcome: TaskOutcome) {
        let label = run.reports[id.0].task.clone();
        match outcome {
            TaskOutcome::Succeeded { reused } => {
                run.reports[id.0].reused = reused;
                if reused {
                    info!("{} already complete, reusing outputs", label);
                } else {
                    info!("{} succeeded", label);
                }
                run.succeed(plan, id);
            }
            TaskOutcome::Failed(error) => {
                warn!("{} failed: {}", label, error);
                run.fail(plan, id, error);
            }
            TaskOutcome::Cancelled => {
                info!("{} cancelled", label);
                run.cancel(id, ReconflowError::Aborted { task: label });
            }
        }
    }
}

async fn execute_task(
    task: TaskInstance,
    runner: Arc<dyn CommandRunner>,
    artifacts: Arc<ArtifactManager>,
    timeout: Duration,
    cancel: CancellationToken,
) -> TaskOutcome {
    match run_invocations(&task, runner.as_ref(), &artifacts, timeout, &cancel).await {
        Ok(outcome) => outcome,
        Err(error) => TaskOutcome::Failed(error),
    }
}

async fn run_invocations(
    task: &TaskInstance,
    runner: &dyn CommandRunner,
    artifacts: &ArtifactManager,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ReconflowResult<TaskOutcome> {
    let label = task.label();
    let outputs = task.expected_outputs();

    if artifacts
        .is_reusable(&task.stem, &outputs, &task.fingerprint)
        .await?
    {
        return Ok(TaskOutcome::Succeeded { reused: true });
    }

    // Outputs are about to be rewritten
    if let Err(e) = artifacts.records().invalidate(&task.stem).await {
        warn!("Could not remove stale completion record for {}: {}", label, e);
    }
    artifacts.prepare(&task.invocations).await?;
    info!("{} started", label);

    let started = Instant::now();
    let deadline = tokio::time::Instant::now() + timeout;

    for invocation in &task.invocations {
        match runner.run(invocation, deadline, cancel).await? {
            RunOutcome::Exited(0) => {
                let missing = missing_outputs(&invocation.expected_outputs).await;
                if !missing.is_empty() {
                    let names: Vec<String> =
                        missing.iter().map(|p| p.display().to_string()).collect();
                    let tail = read_log_tail(&invocation.log_path, LOG_TAIL_LINES).await;
                    return Ok(TaskOutcome::Failed(ReconflowError::backend_failed_with_help(
                        &invocation.label,
                        BackendFailure::MissingOutput,
                        format!("exited successfully but did not write {}", names.join(", ")),
                        &tail,
                    )));
                }
            }
            RunOutcome::Exited(code) => {
                let tail = read_log_tail(&invocation.log_path, LOG_TAIL_LINES).await;
                return Ok(TaskOutcome::Failed(ReconflowError::backend_failed_with_help(
                    &invocation.label,
                    BackendFailure::NonZeroExit,
                    format!("'{}' exited with status {}", invocation.program, code),
                    &tail,
                )));
            }
            RunOutcome::TimedOut => {
                return Ok(TaskOutcome::Failed(ReconflowError::Timeout {
                    task: label,
                    seconds: timeout.as_secs(),
                }));
            }
            RunOutcome::Cancelled => return Ok(TaskOutcome::Cancelled),
        }
    }

    if let Err(e) = artifacts
        .complete(&label, &task.stem, &task.fingerprint, &outputs, started.elapsed())
        .await
    {
        warn!("Could not write completion record for {}: {}", label, e);
    }

    Ok(TaskOutcome::Succeeded { reused: false })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InvocationSpec;
    use crate::plan::TaskInputs;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        Exit(i32),
        ForgetOutputs,
        Hang,
    }

    /// Scripted runner keyed by node name
    struct FakeRunner {
        script: HashMap<String, Behaviour>,
        calls: Mutex<Vec<String>>,
        active: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl FakeRunner {
        fn new(script: &[(&str, Behaviour)]) -> Self {
            Self {
                script: script.iter().map(|(n, b)| (n.to_string(), *b)).collect(),
                calls: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(
            &self,
            invocation: &InvocationSpec,
            deadline: tokio::time::Instant,
            cancel: &CancellationToken,
        ) -> ReconflowResult<RunOutcome> {
            let node = invocation.label.split(':').next().unwrap().to_string();
            self.calls.lock().unwrap().push(node.clone());

            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;

            let behaviour = self.script.get(&node).copied().unwrap_or(Behaviour::Succeed);
            let outcome = match behaviour {
                Behaviour::Succeed => {
                    for output in &invocation.expected_outputs {
                        std::fs::write(output, b"result").unwrap();
                    }
                    RunOutcome::Exited(0)
                }
                Behaviour::Exit(code) => {
                    std::fs::write(&invocation.log_path, "Segmentation fault\n").unwrap();
                    RunOutcome::Exited(code)
                }
                Behaviour::ForgetOutputs => RunOutcome::Exited(0),
                Behaviour::Hang => tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => RunOutcome::TimedOut,
                    _ = cancel.cancelled() => RunOutcome::Cancelled,
                },
            };

            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(outcome)
        }
    }

    fn task(root: &Path, id: usize, node: &str, parents: &[usize], software: Software) -> TaskInstance {
        let node_dir = root.join(node);
        let stem = node_dir.join("space-T1w_desc-test");
        let output = PathBuf::from(format!("{}_out.txt", stem.display()));

        TaskInstance {
            id: TaskId(id),
            node_index: id,
            node: node.into(),
            software,
            action: "conform".into(),
            qualifier: None,
            params: Default::default(),
            inputs: TaskInputs::default(),
            invocations: vec![InvocationSpec {
                program: "fake".into(),
                args: vec![],
                working_dir: node_dir.clone(),
                expected_outputs: vec![output],
                log_path: node_dir.join("logs").join("step.log"),
                label: format!("{}:step", node),
            }],
            stem,
            fingerprint: format!("fp-{}", node),
            depends_on: parents.iter().map(|&p| TaskId(p)).collect(),
            ancestry: vec![node.into()],
        }
    }

    /// A -> B -> C, plus an unrelated root D
    fn chain_plan(root: &Path) -> ExecutionPlan {
        ExecutionPlan::new(
            "chain",
            vec![
                task(root, 0, "A", &[], Software::Qsiprep),
                task(root, 1, "B", &[0], Software::Qsiprep),
                task(root, 2, "C", &[1], Software::Qsiprep),
                task(root, 3, "D", &[], Software::Qsiprep),
            ],
        )
    }

    fn scheduler(root: &Path, runner: Arc<FakeRunner>, options: SchedulerOptions) -> Scheduler {
        Scheduler::new(runner, Arc::new(ArtifactManager::new(root, "T1w")), options)
    }

    fn options(workers: usize) -> SchedulerOptions {
        SchedulerOptions {
            workers,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated_to_its_subtree() {
        let temp = TempDir::new().unwrap();
        let plan = chain_plan(temp.path());
        let runner = Arc::new(FakeRunner::new(&[("B", Behaviour::Exit(1))]));

        let report = scheduler(temp.path(), runner.clone(), options(2))
            .run(&plan, CancellationToken::new())
            .await;

        assert!(!report.success());
        assert_eq!(report.task("A").unwrap().state, TaskState::Succeeded);
        assert_eq!(report.task("B").unwrap().state, TaskState::Failed);
        assert_eq!(report.task("B").unwrap().error_kind, Some("BackendExecutionError"));
        assert_eq!(report.task("B").unwrap().failure, Some(BackendFailure::NonZeroExit));
        assert!(report.task("B").unwrap().cause.as_ref().unwrap().contains("status 1"));

        let c = report.task("C").unwrap();
        assert_eq!(c.state, TaskState::Cancelled);
        assert_eq!(c.error_kind, Some("DependencyFailedError"));
        assert!(c.cause.as_ref().unwrap().contains("'B'"));

        assert_eq!(report.task("D").unwrap().state, TaskState::Succeeded);
        assert!(!runner.calls().contains(&"C".to_string()));
    }

    #[tokio::test]
    async fn test_rerun_reuses_complete_outputs() {
        let temp = TempDir::new().unwrap();
        let plan = chain_plan(temp.path());
        let runner = Arc::new(FakeRunner::new(&[]));
        let scheduler = scheduler(temp.path(), runner.clone(), options(4));

        let first = scheduler.run(&plan, CancellationToken::new()).await;
        assert!(first.success());
        assert_eq!(runner.calls().len(), 4);

        let second = scheduler.run(&plan, CancellationToken::new()).await;
        assert!(second.success());
        assert_eq!(second.reused(), 4);
        assert_eq!(runner.calls().len(), 4, "no backend may run on a complete re-run");
    }

    #[tokio::test]
    async fn test_changed_invocation_is_rerun() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new(&[]));
        let scheduler = scheduler(temp.path(), runner.clone(), options(4));

        let plan = chain_plan(temp.path());
        assert!(scheduler.run(&plan, CancellationToken::new()).await.success());

        let mut tasks = plan.tasks.clone();
        tasks[3].fingerprint = "fp-D-changed".into();
        let changed = ExecutionPlan::new("chain", tasks);
        let report = scheduler.run(&changed, CancellationToken::new()).await;

        assert_eq!(report.reused(), 3);
        assert_eq!(runner.calls().iter().filter(|n| *n == "D").count(), 2);
    }

    #[tokio::test]
    async fn test_missing_output_fails_task() {
        let temp = TempDir::new().unwrap();
        let plan = chain_plan(temp.path());
        let runner = Arc::new(FakeRunner::new(&[
            ("A", Behaviour::ForgetOutputs),
            ("D", Behaviour::Exit(2)),
        ]));

        let report = scheduler(temp.path(), runner, options(2))
            .run(&plan, CancellationToken::new())
            .await;

        let a = report.task("A").unwrap();
        assert_eq!(a.state, TaskState::Failed);
        assert_eq!(a.error_kind, Some("BackendExecutionError"));
        assert_eq!(a.failure, Some(BackendFailure::MissingOutput));
        assert_eq!(report.count(TaskState::Cancelled), 2);

        let d = report.task("D").unwrap();
        assert_eq!(d.failure, Some(BackendFailure::NonZeroExit));
        assert_ne!(a.failure, d.failure);
    }

    #[tokio::test]
    async fn test_timeout_cancels_descendants() {
        let temp = TempDir::new().unwrap();
        let plan = chain_plan(temp.path());
        let runner = Arc::new(FakeRunner::new(&[("A", Behaviour::Hang)]));
        let mut opts = options(2);
        opts.timeouts
            .insert("qsiprep:conform".into(), Duration::from_millis(100));

        let report = scheduler(temp.path(), runner, opts)
            .run(&plan, CancellationToken::new())
            .await;

        assert_eq!(report.task("A").unwrap().error_kind, Some("TimeoutError"));
        assert_eq!(report.task("B").unwrap().state, TaskState::Cancelled);
        assert_eq!(report.task("C").unwrap().state, TaskState::Cancelled);
        assert_eq!(report.task("D").unwrap().state, TaskState::Succeeded);
    }

    #[tokio::test]
    async fn test_abort_cancels_running_and_pending() {
        let temp = TempDir::new().unwrap();
        let plan = chain_plan(temp.path());
        let runner = Arc::new(FakeRunner::new(&[("A", Behaviour::Hang), ("D", Behaviour::Hang)]));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let report = scheduler(temp.path(), runner, options(4)).run(&plan, cancel).await;

        assert!(report.aborted);
        assert_eq!(report.count(TaskState::Cancelled), 4);
        assert!(report.tasks.iter().all(|t| t.error_kind == Some("AbortedError")));
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency() {
        let temp = TempDir::new().unwrap();
        let tasks = (0..6)
            .map(|i| task(temp.path(), i, &format!("n{}", i), &[], Software::Qsiprep))
            .collect();
        let plan = ExecutionPlan::new("wide", tasks);
        let runner = Arc::new(FakeRunner::new(&[]).with_delay(Duration::from_millis(30)));

        let report = scheduler(temp.path(), runner.clone(), options(2))
            .run(&plan, CancellationToken::new())
            .await;

        assert!(report.success());
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_backend_limit_serializes_one_toolkit() {
        let temp = TempDir::new().unwrap();
        let tasks = vec![
            task(temp.path(), 0, "dsi0", &[], Software::DsiStudio),
            task(temp.path(), 1, "dsi1", &[], Software::DsiStudio),
            task(temp.path(), 2, "dsi2", &[], Software::DsiStudio),
        ];
        let plan = ExecutionPlan::new("dsi", tasks);
        let runner = Arc::new(FakeRunner::new(&[]).with_delay(Duration::from_millis(30)));
        let mut opts = options(4);
        opts.backend_limits.insert(Software::DsiStudio, 1);

        let report = scheduler(temp.path(), runner.clone(), opts)
            .run(&plan, CancellationToken::new())
            .await;

        assert!(report.success());
        assert_eq!(runner.peak.load(Ordering::SeqCst), 1);
    }
}
