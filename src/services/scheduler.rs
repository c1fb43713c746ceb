//! Task Scheduler
//!
//! The single authority over plan and task state. The scheduler loop marks
//! tasks ready once all their dependencies succeeded, hands them to a bounded
//! pool of workers, and applies the [`TaskReport`]s that come back over a
//! channel. Workers run the self-correction loop and never write task state
//! themselves.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    resolve_plan_status, ExecutionOutcome, FailureCategory, Plan, PlanStatus, SchedulerConfig, Task, TaskDag,
    TaskDescriptor, TaskStatus,
};
use crate::domain::ports::PlanRepository;
use crate::services::artifact_emitter::ArtifactEmitter;
use crate::services::dag_builder::DagBuilder;
use crate::services::self_correction::{CorrectionLoop, CorrectionReport, CorrectionStatus};

fn transition_error(task: &Task, to: TaskStatus, reason: String) -> DomainError {
    DomainError::InvalidStateTransition {
        from: task.status.as_str().to_string(),
        to: to.as_str().to_string(),
        reason,
    }
}

/// In-memory view of one plan's tasks.
///
/// Pure state: every mutation returns the tasks it changed so the caller can
/// persist them.
#[derive(Debug, Clone)]
pub struct PlanState {
    plan: Plan,
    tasks: Vec<Task>,
    index: HashMap<Uuid, usize>,
    graph: TaskDag,
}

impl PlanState {
    /// `tasks` must be in declaration order.
    pub fn new(plan: Plan, tasks: Vec<Task>) -> Self {
        let index = tasks.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
        let graph = TaskDag::from_validated(tasks.clone());
        Self {
            plan,
            tasks,
            index,
            graph,
        }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.index.get(&id).map(|&i| &self.tasks[i])
    }

    fn task_mut(&mut self, id: Uuid) -> DomainResult<&mut Task> {
        let i = *self.index.get(&id).ok_or(DomainError::TaskNotFound(id))?;
        Ok(&mut self.tasks[i])
    }

    fn dependencies_succeeded(&self, task: &Task) -> bool {
        task.depends_on
            .iter()
            .all(|dep| self.task(*dep).is_some_and(|d| d.status == TaskStatus::Succeeded))
    }

    /// Mark every pending task whose dependencies all succeeded as ready.
    pub fn advance(&mut self) -> Vec<Uuid> {
        let ready: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && self.dependencies_succeeded(t))
            .map(|t| t.id)
            .collect();
        for id in &ready {
            if let Some(&i) = self.index.get(id) {
                // Pending -> Ready is always allowed
                let _ = self.tasks[i].transition_to(TaskStatus::Ready);
            }
        }
        ready
    }

    /// Ready tasks in declaration order.
    pub fn ready(&self) -> Vec<Uuid> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Ready)
            .map(|t| t.id)
            .collect()
    }

    pub fn start(&mut self, id: Uuid) -> DomainResult<()> {
        let task = self.task_mut(id)?;
        task.transition_to(TaskStatus::Running)
            .map_err(|reason| transition_error(task, TaskStatus::Running, reason))
    }

    pub fn succeed(&mut self, id: Uuid) -> DomainResult<()> {
        let task = self.task_mut(id)?;
        task.transition_to(TaskStatus::Succeeded)
            .map_err(|reason| transition_error(task, TaskStatus::Succeeded, reason))
    }

    /// Running task stopped before finishing; it stays `failed` until resumed.
    pub fn interrupt(&mut self, id: Uuid) -> DomainResult<()> {
        let task = self.task_mut(id)?;
        task.transition_to(TaskStatus::Failed)
            .map_err(|reason| transition_error(task, TaskStatus::Failed, reason))
    }

    /// Put a failed task back in line.
    pub fn retry(&mut self, id: Uuid) -> DomainResult<()> {
        let task = self.task_mut(id)?;
        task.transition_to(TaskStatus::Pending)
            .map_err(|reason| transition_error(task, TaskStatus::Pending, reason))
    }

    /// Block `id` and every non-terminal task that transitively depends on
    /// it. Returns the blocked tasks, `id` first.
    pub fn block(&mut self, id: Uuid, reason: impl Into<String>) -> DomainResult<Vec<Uuid>> {
        let key = {
            let task = self.task_mut(id)?;
            task.block(reason)
                .map_err(|reason| transition_error(task, TaskStatus::Blocked, reason))?;
            task.key.clone()
        };

        let mut blocked = vec![id];
        blocked.extend(self.block_dependents_of(id, &key));
        Ok(blocked)
    }

    fn block_dependents_of(&mut self, id: Uuid, key: &str) -> Vec<Uuid> {
        let dependents = self.graph.transitive_dependents(id);
        let mut changed = Vec::new();
        for task in &mut self.tasks {
            if dependents.contains(&task.id)
                && !task.is_terminal()
                && task.block(format!("dependency {key} blocked")).is_ok()
            {
                changed.push(task.id);
            }
        }
        changed
    }

    /// Re-apply blocking to dependents of already-blocked tasks. Used after a
    /// crash that happened between blocking a task and its dependents.
    pub fn propagate_blocked(&mut self) -> Vec<Uuid> {
        let blocked: Vec<(Uuid, String)> = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Blocked)
            .map(|t| (t.id, t.key.clone()))
            .collect();
        blocked
            .into_iter()
            .flat_map(|(id, key)| self.block_dependents_of(id, &key))
            .collect()
    }

    /// Reset tasks left `ready`, `running` or `failed` by an earlier run back
    /// to `pending`. Readiness is recomputed by the next `advance`.
    pub fn reset_interrupted(&mut self) -> Vec<Uuid> {
        let mut changed = Vec::new();
        for task in &mut self.tasks {
            if matches!(task.status, TaskStatus::Ready | TaskStatus::Running | TaskStatus::Failed) {
                task.status = TaskStatus::Pending;
                task.updated_at = chrono::Utc::now();
                changed.push(task.id);
            }
        }
        changed
    }

    /// Final plan status, or `None` while any task is open.
    pub fn resolve(&self) -> Option<PlanStatus> {
        resolve_plan_status(&self.tasks)
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}

/// Progress notifications, for callers that want to follow a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Started { plan_id: Uuid, total_tasks: usize },
    TaskDispatched { task_id: Uuid, key: String },
    TaskSucceeded { task_id: Uuid, attempts: u32 },
    TaskBlocked { task_id: Uuid, reason: String },
    TaskInterrupted { task_id: Uuid },
    Finished { plan_id: Uuid, status: PlanStatus },
}

/// How a worker finished.
#[derive(Debug)]
pub enum WorkerResult {
    Finished(CorrectionReport),
    /// The correction loop panicked
    Crashed(String),
}

/// Message from a worker to the scheduler loop.
#[derive(Debug)]
pub struct TaskReport {
    pub task_id: Uuid,
    pub result: WorkerResult,
}

/// Result of driving a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub plan_id: Uuid,
    pub status: PlanStatus,
    pub succeeded: usize,
    pub blocked: usize,
    /// Tasks left open (cancelled runs only)
    pub unfinished: usize,
    pub cancelled: bool,
}

/// Drives plans to completion.
pub struct Scheduler {
    repository: Arc<dyn PlanRepository>,
    correction: Arc<CorrectionLoop>,
    emitter: ArtifactEmitter,
    builder: DagBuilder,
    config: SchedulerConfig,
    events: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl Scheduler {
    pub fn new(
        repository: Arc<dyn PlanRepository>,
        correction: Arc<CorrectionLoop>,
        emitter: ArtifactEmitter,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repository,
            correction,
            emitter,
            builder: DagBuilder::new(config.default_max_attempts),
            config,
            events: None,
        }
    }

    /// Stream [`SchedulerEvent`]s to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn notify(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Validate and persist a new plan, then emit its overview.
    ///
    /// Structural errors (cycles, unknown dependencies, duplicate keys)
    /// return before anything is stored.
    pub async fn submit(&self, goal: &str, descriptors: &[TaskDescriptor]) -> DomainResult<Plan> {
        let mut plan = Plan::new(goal);
        let dag = self.builder.build(plan.id, descriptors)?;
        plan.task_ids = dag.topological_order();
        plan.set_status(PlanStatus::Running);

        let tasks = dag.into_tasks();
        self.repository.save_plan(&plan).await?;
        self.repository.insert_tasks(&tasks).await?;
        info!(plan_id = %plan.id, tasks = tasks.len(), "plan submitted");

        if let Err(err) = self.emitter.plan_overview(&plan, &tasks).await {
            warn!(plan_id = %plan.id, error = %err, "failed to emit plan overview");
        }
        Ok(plan)
    }

    /// Submit and run in one go.
    pub async fn execute(
        &self,
        goal: &str,
        descriptors: &[TaskDescriptor],
        cancel: CancellationToken,
    ) -> DomainResult<RunSummary> {
        let plan = self.submit(goal, descriptors).await?;
        self.run(plan.id, cancel).await
    }

    /// Resume a persisted plan after a restart or a cancelled run.
    pub async fn resume(&self, plan_id: Uuid, cancel: CancellationToken) -> DomainResult<RunSummary> {
        info!(plan_id = %plan_id, "resuming plan");
        self.run(plan_id, cancel).await
    }

    /// Drive a persisted plan until every task is terminal or `cancel` fires.
    ///
    /// State is loaded from the repository; tasks an earlier process left in
    /// flight are reset to `pending` and attempts already spent stay counted.
    #[instrument(skip(self, cancel), fields(plan_id = %plan_id))]
    pub async fn run(&self, plan_id: Uuid, cancel: CancellationToken) -> DomainResult<RunSummary> {
        let mut state = self.load_state(plan_id).await?;
        self.notify(SchedulerEvent::Started {
            plan_id,
            total_tasks: state.tasks().len(),
        });

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let (tx, mut rx) = mpsc::unbounded_channel::<TaskReport>();
        let mut workers = JoinSet::new();
        let mut in_flight = 0usize;
        let mut cancelled = cancel.is_cancelled();

        loop {
            if !cancelled {
                self.advance(&mut state).await?;
                in_flight += self
                    .dispatch(&mut state, &semaphore, &tx, &mut workers, &cancel)
                    .await?;
            }
            if in_flight == 0 {
                break;
            }

            tokio::select! {
                Some(report) = rx.recv() => {
                    in_flight -= 1;
                    self.apply(&mut state, report).await?;
                }
                () = cancel.cancelled(), if !cancelled => {
                    info!("cancellation requested, waiting for workers to stop");
                    cancelled = true;
                }
            }
        }
        while workers.join_next().await.is_some() {}

        self.finish(state, cancelled).await
    }

    /// Load plan and tasks, recover from an interrupted run, re-emit anything
    /// a crash may have cut off.
    async fn load_state(&self, plan_id: Uuid) -> DomainResult<PlanState> {
        let mut plan = self
            .repository
            .load_plan(plan_id)
            .await?
            .ok_or(DomainError::PlanNotFound(plan_id))?;
        let mut tasks = self.repository.load_tasks(plan_id).await?;

        for task in tasks.iter_mut().filter(|t| !t.is_terminal()) {
            let spent = self
                .repository
                .outcomes_for_task(task.id)
                .await?
                .iter()
                .map(|o| o.attempt)
                .max()
                .unwrap_or(0);
            if spent > task.attempt_count {
                debug!(task = %task.key, spent, "recovered attempt count from history");
                task.attempt_count = spent;
            }
        }

        if plan.status == PlanStatus::Planning {
            plan.set_status(PlanStatus::Running);
            self.repository.update_plan(&plan).await?;
        }

        let mut state = PlanState::new(plan, tasks);
        let reset = state.reset_interrupted();
        let propagated = state.propagate_blocked();
        if !reset.is_empty() || !propagated.is_empty() {
            info!(reset = reset.len(), blocked = propagated.len(), "recovered interrupted plan state");
        }
        for task in state.tasks().iter().filter(|t| !t.is_terminal() || propagated.contains(&t.id)) {
            self.repository.update_task(task).await?;
        }

        if let Err(err) = self.emitter.plan_overview(state.plan(), state.tasks()).await {
            warn!(error = %err, "failed to emit plan overview");
        }
        let terminal: Vec<Uuid> = state.tasks().iter().filter(|t| t.is_terminal()).map(|t| t.id).collect();
        for id in terminal {
            self.emit_fragment(&state, id).await;
        }

        Ok(state)
    }

    /// Mark newly ready tasks and persist them.
    async fn advance(&self, state: &mut PlanState) -> DomainResult<()> {
        for id in state.advance() {
            if let Some(task) = state.task(id) {
                debug!(task = %task.key, "task ready");
                self.repository.update_task(task).await?;
            }
        }
        Ok(())
    }

    /// Start as many ready tasks as there are free workers.
    async fn dispatch(
        &self,
        state: &mut PlanState,
        semaphore: &Arc<Semaphore>,
        tx: &mpsc::UnboundedSender<TaskReport>,
        workers: &mut JoinSet<()>,
        cancel: &CancellationToken,
    ) -> DomainResult<usize> {
        let mut started = 0;
        for id in state.ready() {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                break;
            };

            state.start(id)?;
            let task = state.task(id).cloned().ok_or(DomainError::TaskNotFound(id))?;
            self.repository.update_task(&task).await?;
            info!(task = %task.key, attempt = task.attempt_count + 1, "dispatching task");
            self.notify(SchedulerEvent::TaskDispatched {
                task_id: id,
                key: task.key.clone(),
            });

            let correction = self.correction.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            workers.spawn(async move {
                let task_id = task.id;
                let run = tokio::spawn(async move { correction.run(&task, cancel).await });
                let result = match run.await {
                    Ok(report) => WorkerResult::Finished(report),
                    Err(err) => WorkerResult::Crashed(err.to_string()),
                };
                // Free the slot before reporting so the next dispatch sees it.
                drop(permit);
                let _ = tx.send(TaskReport { task_id, result });
            });
            started += 1;
        }
        Ok(started)
    }

    /// Apply one worker report. The only place task results are written.
    async fn apply(&self, state: &mut PlanState, report: TaskReport) -> DomainResult<()> {
        let id = report.task_id;
        match report.result {
            WorkerResult::Finished(correction) => {
                {
                    let task = state.task_mut(id)?;
                    task.attempt_count = correction.attempts;
                    if correction.final_code.is_some() {
                        task.code.clone_from(&correction.final_code);
                    }
                    if let Some(last) = correction.outcomes.last() {
                        task.last_outcome_id = Some(last.id);
                    }
                }

                match correction.status {
                    CorrectionStatus::Succeeded => {
                        state.succeed(id)?;
                        self.persist(state, id).await?;
                        self.notify(SchedulerEvent::TaskSucceeded {
                            task_id: id,
                            attempts: correction.attempts,
                        });
                        self.emit_fragment(state, id).await;
                    }
                    CorrectionStatus::Exhausted => {
                        let category = correction
                            .outcomes
                            .last()
                            .and_then(|o| o.category)
                            .map_or("unknown", |c| c.as_str());
                        let reason = format!(
                            "retry budget exhausted after {} attempt(s), last failure {category}",
                            correction.attempts
                        );
                        self.block(state, id, reason).await?;
                    }
                    CorrectionStatus::Cancelled => {
                        state.interrupt(id)?;
                        self.persist(state, id).await?;
                        self.notify(SchedulerEvent::TaskInterrupted { task_id: id });
                    }
                }
            }
            WorkerResult::Crashed(message) => {
                warn!(task_id = %id, error = %message, "worker crashed");
                let (attempt, has_attempts_left) = {
                    let task = state.task_mut(id)?;
                    task.attempt_count += 1;
                    (task.attempt_count, task.has_attempts_left())
                };
                let outcome = ExecutionOutcome::failure(
                    id,
                    attempt,
                    FailureCategory::RuntimeError,
                    format!("WorkerPanic: {message}"),
                );
                self.repository.append_outcome(&outcome).await?;
                state.task_mut(id)?.last_outcome_id = Some(outcome.id);

                state.interrupt(id)?;
                if has_attempts_left {
                    state.retry(id)?;
                    self.persist(state, id).await?;
                } else {
                    self.block(state, id, "retry budget exhausted after worker crash".to_string())
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn block(&self, state: &mut PlanState, id: Uuid, reason: String) -> DomainResult<()> {
        let blocked = state.block(id, reason)?;
        for blocked_id in blocked {
            self.persist(state, blocked_id).await?;
            if let Some(task) = state.task(blocked_id) {
                info!(task = %task.key, reason = ?task.blocked_reason, "task blocked");
                self.notify(SchedulerEvent::TaskBlocked {
                    task_id: blocked_id,
                    reason: task.blocked_reason.clone().unwrap_or_default(),
                });
            }
            self.emit_fragment(state, blocked_id).await;
        }
        Ok(())
    }

    async fn persist(&self, state: &PlanState, id: Uuid) -> DomainResult<()> {
        let task = state.task(id).ok_or(DomainError::TaskNotFound(id))?;
        self.repository.update_task(task).await
    }

    async fn emit_fragment(&self, state: &PlanState, id: Uuid) {
        let Some(task) = state.task(id) else {
            return;
        };
        let history = match self.repository.outcomes_for_task(id).await {
            Ok(history) => history,
            Err(err) => {
                warn!(task = %task.key, error = %err, "failed to load outcome history");
                Vec::new()
            }
        };
        if let Err(err) = self.emitter.task_fragment(state.plan(), task, &history).await {
            warn!(task = %task.key, error = %err, "failed to emit task fragment");
        }
    }

    async fn finish(&self, mut state: PlanState, cancelled: bool) -> DomainResult<RunSummary> {
        if let Some(status) = state.resolve() {
            if state.plan.status != status {
                state.plan.set_status(status);
                self.repository.update_plan(&state.plan).await?;
            }

            let mut histories = HashMap::new();
            let blocked: HashSet<Uuid> = state
                .tasks()
                .iter()
                .filter(|t| t.status == TaskStatus::Blocked)
                .map(|t| t.id)
                .collect();
            for id in blocked {
                histories.insert(id, self.repository.outcomes_for_task(id).await?);
            }
            if let Err(err) = self
                .emitter
                .final_summary(state.plan(), state.tasks(), &histories)
                .await
            {
                warn!(error = %err, "failed to emit final summary");
            }
            info!(status = %status, "plan finished");
            self.notify(SchedulerEvent::Finished {
                plan_id: state.plan.id,
                status,
            });
        } else {
            info!(cancelled, "plan left open for resume");
        }

        let succeeded = state.count(TaskStatus::Succeeded);
        let blocked = state.count(TaskStatus::Blocked);
        Ok(RunSummary {
            plan_id: state.plan.id,
            status: state.plan.status,
            succeeded,
            blocked,
            unfinished: state.tasks().len() - succeeded - blocked,
            cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::generators::ScriptedCodeGenerator;
    use crate::adapters::knowledge::InMemoryKnowledgeBackend;
    use crate::adapters::sandbox::ScriptedSandbox;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqlitePlanRepository};
    use crate::services::knowledge_store::KnowledgeStore;
    use crate::services::self_correction::CorrectionConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        repository: Arc<SqlitePlanRepository>,
        sandbox: Arc<ScriptedSandbox>,
        scheduler: Scheduler,
    }

    async fn harness(max_concurrency: usize) -> Harness {
        let dir = TempDir::new().unwrap();
        let pool = create_migrated_test_pool().await.unwrap();
        let repository = Arc::new(SqlitePlanRepository::new(pool));
        let sandbox = Arc::new(ScriptedSandbox::new());
        let generator = Arc::new(ScriptedCodeGenerator::new(|request| {
            if request.description.contains("broken") {
                Ok("# fail: E_BOOM: still broken".to_string())
            } else {
                Ok(format!("# print: regenerated {}", request.task_key))
            }
        }));
        let knowledge = KnowledgeStore::new(
            vec![Arc::new(InMemoryKnowledgeBackend::new(32))],
            Duration::from_secs(1),
        );
        let correction = Arc::new(CorrectionLoop::new(
            generator,
            sandbox.clone(),
            knowledge,
            repository.clone(),
            CorrectionConfig {
                workspace_dir: dir.path().join("workspace"),
                ..CorrectionConfig::default()
            },
        ));
        let scheduler = Scheduler::new(
            repository.clone(),
            correction,
            ArtifactEmitter::new(dir.path().join("artifacts")),
            SchedulerConfig {
                max_concurrency,
                default_max_attempts: 2,
            },
        );
        Harness {
            _dir: dir,
            repository,
            sandbox,
            scheduler,
        }
    }

    fn ok(key: &str) -> TaskDescriptor {
        TaskDescriptor::new(key, format!("task {key}")).with_code(format!("# print: {key}"))
    }

    fn always_failing(key: &str) -> TaskDescriptor {
        TaskDescriptor::new(key, "always broken").with_code("# fail: E_BOOM: broken")
    }

    #[test]
    fn test_advance_waits_for_every_dependency() {
        let plan = Plan::new("g");
        let t1 = Task::new(plan.id, "T1", "a");
        let t2 = Task::new(plan.id, "T2", "b");
        let t3 = Task::new(plan.id, "T3", "c").with_dependency(t1.id).with_dependency(t2.id);
        let ids = (t1.id, t2.id, t3.id);
        let mut state = PlanState::new(plan, vec![t1, t2, t3]);

        assert_eq!(state.advance(), vec![ids.0, ids.1]);
        state.start(ids.0).unwrap();
        state.succeed(ids.0).unwrap();
        assert!(state.advance().is_empty());

        state.start(ids.1).unwrap();
        state.succeed(ids.1).unwrap();
        assert_eq!(state.advance(), vec![ids.2]);
    }

    #[test]
    fn test_block_propagates_transitively_only() {
        let plan = Plan::new("g");
        let t1 = Task::new(plan.id, "T1", "a");
        let t2 = Task::new(plan.id, "T2", "b").with_dependency(t1.id);
        let t3 = Task::new(plan.id, "T3", "c").with_dependency(t2.id);
        let t4 = Task::new(plan.id, "T4", "d");
        let ids = [t1.id, t2.id, t3.id, t4.id];
        let mut state = PlanState::new(plan, vec![t1, t2, t3, t4]);

        let blocked = state.block(ids[0], "budget").unwrap();
        assert_eq!(blocked, vec![ids[0], ids[1], ids[2]]);
        assert_eq!(state.task(ids[2]).unwrap().blocked_reason.as_deref(), Some("dependency T1 blocked"));
        assert_eq!(state.task(ids[3]).unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_chain_completes_in_dependency_order() {
        let h = harness(4).await;
        let summary = h
            .scheduler
            .execute(
                "chain",
                &[ok("T1"), ok("T2").depends_on("T1"), ok("T3").depends_on("T2")],
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.status, PlanStatus::Completed);
        assert_eq!(summary.succeeded, 3);
        let order: Vec<String> = h
            .sandbox
            .executions()
            .await
            .into_iter()
            .map(|e| e.code)
            .collect();
        assert!(order[0].contains("# print: T1"));
        assert!(order[2].contains("# print: T3"));
    }

    #[tokio::test]
    async fn test_exhausted_task_blocks_dependents() {
        let h = harness(2).await;
        let summary = h
            .scheduler
            .execute(
                "blocking",
                &[
                    always_failing("T1"),
                    ok("T2").depends_on("T1"),
                    ok("T3").depends_on("T2"),
                    ok("T4"),
                ],
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.status, PlanStatus::Completed);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.blocked, 3);

        let tasks = h.repository.load_tasks(summary.plan_id).await.unwrap();
        assert_eq!(tasks[0].attempt_count, 2);
        assert!(tasks[0].blocked_reason.as_deref().unwrap().contains("runtime_error"));
        assert_eq!(tasks[2].blocked_reason.as_deref(), Some("dependency T1 blocked"));
        assert_eq!(tasks[1].attempt_count, 0);
    }

    #[tokio::test]
    async fn test_all_blocked_plan_fails() {
        let h = harness(1).await;
        let summary = h
            .scheduler
            .execute("doomed", &[always_failing("T1")], CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.status, PlanStatus::Failed);
        let plan = h.repository.load_plan(summary.plan_id).await.unwrap().unwrap();
        assert_eq!(plan.status, PlanStatus::Failed);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let h = harness(2).await;
        let descriptors: Vec<TaskDescriptor> = (1..=6)
            .map(|i| TaskDescriptor::new(format!("T{i}"), "nap").with_code("# sleep: 40"))
            .collect();
        let summary = h
            .scheduler
            .execute("parallel", &descriptors, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 6);
        assert!(h.sandbox.peak_concurrency() <= 2);
        assert!(h.sandbox.peak_concurrency() >= 1);
    }

    #[tokio::test]
    async fn test_cycle_is_rejected_before_anything_runs() {
        let h = harness(2).await;
        let err = h
            .scheduler
            .execute(
                "cyclic",
                &[ok("A").depends_on("B"), ok("B").depends_on("A")],
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::DependencyCycle(_)));
        assert!(h.sandbox.executions().await.is_empty());
        assert!(h.repository.list_plans(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_plan_completes() {
        let h = harness(2).await;
        let summary = h.scheduler.execute("nothing", &[], CancellationToken::new()).await.unwrap();
        assert_eq!(summary.status, PlanStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancellation_leaves_plan_resumable() {
        let h = harness(2).await;
        let plan = h
            .scheduler
            .submit("slow", &[TaskDescriptor::new("T1", "slow").with_code("# sleep: 5000")])
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let summary = h.scheduler.run(plan.id, cancel).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.status, PlanStatus::Running);
        assert_eq!(summary.unfinished, 1);

        let tasks = h.repository.load_tasks(plan.id).await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Failed);
        let history = h.repository.outcomes_for_task(tasks[0].id).await.unwrap();
        assert_eq!(history.last().unwrap().category, Some(FailureCategory::Cancelled));
    }

    #[tokio::test]
    async fn test_events_follow_dependencies() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let h = harness(4).await;
        let scheduler = h.scheduler.with_events(tx);
        let summary = scheduler
            .execute("events", &[ok("T1"), ok("T2").depends_on("T1")], CancellationToken::new())
            .await
            .unwrap();
        drop(scheduler);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let position = |pred: &dyn Fn(&SchedulerEvent) -> bool| events.iter().position(|e| pred(e)).unwrap();
        let t1_done = position(&|e| matches!(e, SchedulerEvent::TaskSucceeded { .. }));
        let t2_start = position(&|e| matches!(e, SchedulerEvent::TaskDispatched { key, .. } if key == "T2"));
        assert!(t1_done < t2_start);
        assert_eq!(
            events.last(),
            Some(&SchedulerEvent::Finished {
                plan_id: summary.plan_id,
                status: PlanStatus::Completed
            })
        );
    }
}
