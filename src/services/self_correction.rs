//! Self-Correction Loop
//!
//! Drives one task through `Executing → Success` or
//! `Executing → Failed → Diagnosing → Regenerating → Executing …` until the
//! attempt budget is spent. Every `Executing` entry consumes one attempt,
//! including attempts that never reach the sandbox because generation or
//! validation failed.
//!
//! The loop never touches task state; it returns a [`CorrectionReport`] and
//! the scheduler applies it. Outcomes are persisted as they happen.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::GeneratorError;
use crate::domain::models::{ErrorSignature, ExecutionOutcome, FailureCategory, Fix, Task};
use crate::domain::ports::{
    AttemptContext, CodeGenerator, FixSuggester, GenerationRequest, PlanRepository, Sandbox, SandboxRequest,
};
use crate::services::artifact_emitter::ArtifactEmitter;
use crate::services::code_validator::CodeValidator;
use crate::services::knowledge_store::KnowledgeStore;

/// Longest stderr tail handed to the generator.
const STDERR_EXCERPT_BYTES: usize = 2000;

/// How a correction run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionStatus {
    Succeeded,
    /// Attempt budget spent; the task becomes blocked
    Exhausted,
    /// The plan was cancelled mid-run
    Cancelled,
}

/// Everything the scheduler needs to apply a finished run.
#[derive(Debug, Clone)]
pub struct CorrectionReport {
    pub task_id: uuid::Uuid,
    pub status: CorrectionStatus,
    /// Total attempts spent on the task, including earlier runs
    pub attempts: u32,
    /// Outcomes of this run, in order
    pub outcomes: Vec<ExecutionOutcome>,
    /// Signature of the first failure of this run
    pub originating_signature: Option<ErrorSignature>,
    pub used_knowledge_hint: bool,
    /// Latest sanitized code
    pub final_code: Option<String>,
}

/// Timeouts and paths used by the loop.
#[derive(Debug, Clone)]
pub struct CorrectionConfig {
    pub workspace_dir: PathBuf,
    pub sandbox_timeout: Duration,
    pub generator_timeout: Duration,
    pub suggester_timeout: Duration,
    pub similarity_threshold: f64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from(".forgeloop/workspace"),
            sandbox_timeout: Duration::from_secs(30),
            generator_timeout: Duration::from_secs(120),
            suggester_timeout: Duration::from_secs(30),
            similarity_threshold: 0.6,
        }
    }
}

/// What the next attempt starts from.
enum NextCode {
    /// Run this code as is
    Ready(String),
    /// Ask the generator, optionally with the previous attempt's context
    Generate(Option<AttemptContext>),
}

/// Per-task retry loop shared by all workers.
pub struct CorrectionLoop {
    generator: Arc<dyn CodeGenerator>,
    suggester: Option<Arc<dyn FixSuggester>>,
    sandbox: Arc<dyn Sandbox>,
    knowledge: KnowledgeStore,
    repository: Arc<dyn PlanRepository>,
    emitter: Option<ArtifactEmitter>,
    validator: CodeValidator,
    config: CorrectionConfig,
}

impl CorrectionLoop {
    pub fn new(
        generator: Arc<dyn CodeGenerator>,
        sandbox: Arc<dyn Sandbox>,
        knowledge: KnowledgeStore,
        repository: Arc<dyn PlanRepository>,
        config: CorrectionConfig,
    ) -> Self {
        Self {
            generator,
            suggester: None,
            sandbox,
            knowledge,
            repository,
            emitter: None,
            validator: CodeValidator::new(),
            config,
        }
    }

    pub fn with_suggester(mut self, suggester: Arc<dyn FixSuggester>) -> Self {
        self.suggester = Some(suggester);
        self
    }

    /// Keep every attempt's code through the emitter.
    pub fn with_emitter(mut self, emitter: ArtifactEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn knowledge(&self) -> &KnowledgeStore {
        &self.knowledge
    }

    fn work_dir(&self, task: &Task) -> PathBuf {
        self.config
            .workspace_dir
            .join(task.plan_id.to_string())
            .join(task.id.to_string())
    }

    /// Run `task` until it succeeds, exhausts its budget or is cancelled.
    ///
    /// Attempts already spent (`task.attempt_count`) are honoured, so a
    /// resumed task only gets what is left of its budget.
    #[instrument(skip(self, task, cancel), fields(plan_id = %task.plan_id, task_id = %task.id, task = %task.key))]
    pub async fn run(&self, task: &Task, cancel: CancellationToken) -> CorrectionReport {
        let mut report = CorrectionReport {
            task_id: task.id,
            status: CorrectionStatus::Exhausted,
            attempts: task.attempt_count,
            outcomes: Vec::new(),
            originating_signature: None,
            used_knowledge_hint: false,
            final_code: task.code.clone(),
        };
        let mut first_failing_code: Option<String> = None;
        let mut last_hint: Option<String> = None;

        let mut next = self.starting_point(task).await;

        while report.attempts < task.max_attempts {
            if cancel.is_cancelled() {
                report.status = CorrectionStatus::Cancelled;
                return report;
            }

            report.attempts += 1;
            let attempt = report.attempts;
            let started = Instant::now();
            debug!(attempt, max_attempts = task.max_attempts, "executing");

            let (code, outcome) = match self.obtain_code(task, attempt, next, &cancel).await {
                Ok(raw) => {
                    let (code, outcome) = self.execute(task, attempt, &raw, &cancel).await;
                    (Some(code), outcome)
                }
                Err(GeneratorError::Cancelled) => {
                    let outcome = ExecutionOutcome::failure(
                        task.id,
                        attempt,
                        FailureCategory::Cancelled,
                        "Cancelled: plan cancelled",
                    );
                    (None, outcome)
                }
                Err(err) => {
                    warn!(attempt, error = %err, "code generation failed");
                    let outcome = ExecutionOutcome::failure(
                        task.id,
                        attempt,
                        FailureCategory::GenerationError,
                        format!("GeneratorError: {err}"),
                    );
                    (None, outcome)
                }
            };
            let outcome = if outcome.duration_ms == 0 {
                outcome.with_duration_ms(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
            } else {
                outcome
            };

            if let Err(err) = self.repository.append_outcome(&outcome).await {
                warn!(attempt, error = %err, "failed to persist execution outcome");
            }
            if code.is_some() {
                report.final_code.clone_from(&code);
            }
            report.outcomes.push(outcome.clone());

            if outcome.is_success() {
                info!(attempt, "task succeeded");
                report.status = CorrectionStatus::Succeeded;
                self.learn(task, &report, first_failing_code.as_deref(), last_hint.as_deref())
                    .await;
                return report;
            }

            let Some(signature) = outcome.signature.clone() else {
                // Failures always carry a signature; treat a missing one as exhausted.
                break;
            };
            info!(
                attempt,
                category = ?outcome.category,
                signature = %signature,
                "attempt failed"
            );

            if outcome.category == Some(FailureCategory::Cancelled) {
                report.status = CorrectionStatus::Cancelled;
                return report;
            }

            if report.originating_signature.is_none() {
                report.originating_signature = Some(signature.clone());
                first_failing_code.clone_from(&code);
            }

            if report.attempts >= task.max_attempts {
                break;
            }

            let context = self
                .diagnose(task, signature, code.unwrap_or_default(), &outcome.stderr)
                .await;
            if context.knowledge_hint.is_some() {
                report.used_knowledge_hint = true;
            }
            last_hint = context
                .suggester_hint
                .clone()
                .or_else(|| context.knowledge_hint.as_ref().map(|fix| fix.description.clone()));
            next = NextCode::Generate(Some(context));
        }

        info!(attempts = report.attempts, "attempt budget exhausted");
        report.status = CorrectionStatus::Exhausted;
        report
    }

    /// Stored code for a fresh task; regeneration when the task's last
    /// recorded attempt failed.
    async fn starting_point(&self, task: &Task) -> NextCode {
        if task.attempt_count > 0 {
            let history = self.repository.outcomes_for_task(task.id).await.unwrap_or_default();
            let failed_last = history
                .last()
                .filter(|last| last.category != Some(FailureCategory::Cancelled));
            if let Some(last) = failed_last {
                if let Some(signature) = last.signature.clone() {
                    let context = self
                        .diagnose(task, signature, task.code.clone().unwrap_or_default(), &last.stderr)
                        .await;
                    return NextCode::Generate(Some(context));
                }
            }
        }
        task.code
            .clone()
            .map_or(NextCode::Generate(None), NextCode::Ready)
    }

    /// Code for the next attempt. Generation is abandoned as soon as `cancel`
    /// fires.
    async fn obtain_code(
        &self,
        task: &Task,
        attempt: u32,
        next: NextCode,
        cancel: &CancellationToken,
    ) -> Result<String, GeneratorError> {
        let previous = match next {
            NextCode::Ready(code) => return Ok(code),
            NextCode::Generate(previous) => previous,
        };

        let example = self
            .knowledge
            .success_pattern(task.kind, &task.description)
            .await
            .map(|p| p.code);
        let mut request = GenerationRequest::new(task.id, task.key.clone(), task.description.clone(), task.kind, attempt)
            .with_example(example);
        if let Some(previous) = previous {
            request = request.with_previous(previous);
        }

        let generated = tokio::select! {
            () = cancel.cancelled() => return Err(GeneratorError::Cancelled),
            generated = tokio::time::timeout(self.config.generator_timeout, self.generator.generate(&request)) => generated,
        };
        match generated {
            Ok(Ok(code)) if code.trim().is_empty() => Err(GeneratorError::EmptyOutput),
            Ok(result) => result,
            Err(_) => Err(GeneratorError::Timeout(self.config.generator_timeout.as_secs())),
        }
    }

    /// Validate, keep, then run one artifact. Returns the sanitized code.
    async fn execute(
        &self,
        task: &Task,
        attempt: u32,
        code: &str,
        cancel: &CancellationToken,
    ) -> (String, ExecutionOutcome) {
        let validation = self.validator.validate(code, task.kind);

        if let Some(emitter) = &self.emitter {
            if let Err(err) = emitter
                .write_generated_file(task.plan_id, task, attempt, &validation.code)
                .await
            {
                warn!(attempt, error = %err, "failed to keep generated code");
            }
        }

        if !validation.is_clean() {
            let outcome = ExecutionOutcome::failure(
                task.id,
                attempt,
                FailureCategory::ValidationError,
                validation.failure_message(),
            );
            return (validation.code, outcome);
        }

        let request = SandboxRequest {
            plan_id: task.plan_id,
            task_id: task.id,
            attempt,
            code: validation.code.clone(),
            work_dir: self.work_dir(task),
            timeout: self.config.sandbox_timeout,
            cancel: cancel.clone(),
        };
        let outcome = match self.sandbox.execute(request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(attempt, error = %err, "sandbox unusable");
                ExecutionOutcome::failure(
                    task.id,
                    attempt,
                    FailureCategory::RuntimeError,
                    format!("SandboxError: {err}"),
                )
            }
        };
        (validation.code, outcome)
    }

    /// Gather hints for the next regeneration.
    async fn diagnose(
        &self,
        task: &Task,
        signature: ErrorSignature,
        failing_code: String,
        stderr: &str,
    ) -> AttemptContext {
        let entry = match self.knowledge.lookup(&signature).await {
            Some(entry) => Some(entry),
            None => {
                self.knowledge
                    .lookup_similar(&signature, self.config.similarity_threshold)
                    .await
            }
        };
        if let Some(entry) = &entry {
            info!(signature = %signature, matched = %entry.signature, "reusing known fix as hint");
        }
        let reflection_note = self.knowledge.note_for(&signature.key()).await.map(|n| n.note);

        let suggester_hint = match &self.suggester {
            Some(suggester) => {
                match tokio::time::timeout(
                    self.config.suggester_timeout,
                    suggester.suggest_fix(&signature, &failing_code),
                )
                .await
                {
                    Ok(Ok(hint)) => hint,
                    Ok(Err(err)) => {
                        debug!(task = %task.key, error = %err, "fix suggester failed");
                        None
                    }
                    Err(_) => {
                        debug!(task = %task.key, "fix suggester timed out");
                        None
                    }
                }
            }
            None => None,
        };

        AttemptContext {
            failing_code,
            signature,
            stderr_excerpt: tail(stderr, STDERR_EXCERPT_BYTES).to_string(),
            knowledge_hint: entry.map(|e| e.fix()),
            suggester_hint,
            reflection_note,
        }
    }

    /// Record what worked: the fix under the originating signature when the
    /// run recovered from a failure, and the success pattern always.
    async fn learn(&self, task: &Task, report: &CorrectionReport, failing_code: Option<&str>, hint: Option<&str>) {
        let Some(code) = report.final_code.as_deref() else {
            return;
        };

        if let Some(signature) = &report.originating_signature {
            let description = describe_fix(failing_code.unwrap_or_default(), code, hint);
            info!(signature = %signature, "recording fix");
            self.knowledge.record(signature, &Fix::new(description, code)).await;
        }
        self.knowledge
            .record_success_pattern(task.kind, &task.description, code)
            .await;
    }
}

/// The hint when there was one, otherwise a line-diff summary.
fn describe_fix(failing: &str, accepted: &str, hint: Option<&str>) -> String {
    if let Some(hint) = hint.filter(|h| !h.trim().is_empty()) {
        return hint.trim().to_string();
    }
    let before: std::collections::HashSet<&str> = failing.lines().map(str::trim).collect();
    let after: std::collections::HashSet<&str> = accepted.lines().map(str::trim).collect();
    let added = after.difference(&before).filter(|l| !l.is_empty()).count();
    let removed = before.difference(&after).filter(|l| !l.is_empty()).count();
    format!("regenerated: +{added}/-{removed} lines")
}

/// Last `max` bytes of `s`, cut on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::generators::ScriptedCodeGenerator;
    use crate::adapters::knowledge::InMemoryKnowledgeBackend;
    use crate::adapters::sandbox::ScriptedSandbox;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqlitePlanRepository};
    use crate::domain::models::{Plan, TaskKind};
    use crate::domain::ports::KnowledgeBackend;

    struct Harness {
        repository: Arc<SqlitePlanRepository>,
        memory: Arc<InMemoryKnowledgeBackend>,
        sandbox: Arc<ScriptedSandbox>,
        plan: Plan,
    }

    async fn harness() -> Harness {
        let pool = create_migrated_test_pool().await.unwrap();
        let repository = Arc::new(SqlitePlanRepository::new(pool));
        let plan = Plan::new("goal");
        repository.save_plan(&plan).await.unwrap();
        Harness {
            repository,
            memory: Arc::new(InMemoryKnowledgeBackend::new(64)),
            sandbox: Arc::new(ScriptedSandbox::new()),
            plan,
        }
    }

    impl Harness {
        fn correction_loop(&self, generator: Arc<dyn CodeGenerator>) -> CorrectionLoop {
            let knowledge = KnowledgeStore::new(vec![self.memory.clone()], Duration::from_secs(1));
            CorrectionLoop::new(
                generator,
                self.sandbox.clone(),
                knowledge,
                self.repository.clone(),
                CorrectionConfig {
                    workspace_dir: std::env::temp_dir(),
                    ..CorrectionConfig::default()
                },
            )
        }

        async fn task(&self, max_attempts: u32) -> Task {
            let task = Task::new(self.plan.id, "T1", "say hi").with_max_attempts(max_attempts);
            self.repository.insert_tasks(std::slice::from_ref(&task)).await.unwrap();
            task
        }
    }

    const FAILING: &str = "# fail: E_IMPORT: cannot import helper";

    #[tokio::test]
    async fn test_success_on_first_attempt_records_pattern_only() {
        let h = harness().await;
        let generator = Arc::new(ScriptedCodeGenerator::echo());
        let task = h.task(3).await;

        let report = h.correction_loop(generator).run(&task, CancellationToken::new()).await;

        assert_eq!(report.status, CorrectionStatus::Succeeded);
        assert_eq!(report.attempts, 1);
        assert!(report.originating_signature.is_none());
        assert!(h.memory.is_empty());
        let digest = crate::domain::models::SuccessPattern::digest(&task.description);
        assert!(h.memory.success_pattern(TaskKind::CodeExecution, &digest).await.unwrap().is_some());
        assert_eq!(h.repository.outcomes_for_task(task.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recovery_records_fix_under_originating_signature() {
        let h = harness().await;
        let generator = Arc::new(ScriptedCodeGenerator::new(|request| {
            Ok(if request.previous.is_some() {
                "print('fixed')".to_string()
            } else {
                FAILING.to_string()
            })
        }));
        let task = h.task(3).await;

        let report = h.correction_loop(generator.clone()).run(&task, CancellationToken::new()).await;

        assert_eq!(report.status, CorrectionStatus::Succeeded);
        assert_eq!(report.attempts, 2);
        let signature = report.originating_signature.clone().unwrap();
        assert_eq!(signature.key(), "runtime_error:E_IMPORT:cannot import helper");

        let entry = h.memory.lookup(&signature).await.unwrap().unwrap();
        assert!(entry.fix_code.contains("print('fixed')"));
        assert!(!report.used_knowledge_hint);

        let requests = generator.requests().await;
        assert_eq!(requests.len(), 2);
        let previous = requests[1].previous.as_ref().unwrap();
        assert!(previous.failing_code.contains("E_IMPORT"));
        assert!(previous.stderr_excerpt.contains("cannot import helper"));
    }

    #[tokio::test]
    async fn test_exhaustion_at_budget() {
        let h = harness().await;
        let generator = Arc::new(ScriptedCodeGenerator::new(|_| Ok(FAILING.to_string())));
        let task = h.task(2).await;

        let report = h.correction_loop(generator.clone()).run(&task, CancellationToken::new()).await;

        assert_eq!(report.status, CorrectionStatus::Exhausted);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(generator.requests().await.len(), 2);
        assert!(h.memory.is_empty());
    }

    #[tokio::test]
    async fn test_known_fix_is_passed_as_hint() {
        let h = harness().await;
        let signature = ErrorSignature::normalize(FailureCategory::RuntimeError, "E_IMPORT: cannot import helper");
        h.memory
            .record(&crate::domain::models::KnowledgeEntry::new(&signature, &Fix::new("vendor it", "print('v')")))
            .await
            .unwrap();

        let generator = Arc::new(ScriptedCodeGenerator::new(|_| Ok(FAILING.to_string())));
        let task = h.task(2).await;
        let report = h.correction_loop(generator.clone()).run(&task, CancellationToken::new()).await;

        assert!(report.used_knowledge_hint);
        assert_eq!(report.status, CorrectionStatus::Exhausted);
        let requests = generator.requests().await;
        assert_eq!(requests[1].knowledge_hint().unwrap().description, "vendor it");
        assert_eq!(h.memory.lookup(&signature).await.unwrap().unwrap().success_count, 1);
    }

    #[tokio::test]
    async fn test_generator_failure_consumes_attempts() {
        let h = harness().await;
        let generator = Arc::new(ScriptedCodeGenerator::new(|_| Err(GeneratorError::EmptyOutput)));
        let task = h.task(3).await;

        let report = h.correction_loop(generator).run(&task, CancellationToken::new()).await;

        assert_eq!(report.status, CorrectionStatus::Exhausted);
        assert_eq!(report.attempts, 3);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.category == Some(FailureCategory::GenerationError)));
    }

    #[tokio::test]
    async fn test_validation_failure_skips_sandbox() {
        let h = harness().await;
        let generator = Arc::new(ScriptedCodeGenerator::new(|request| {
            Ok(if request.attempt == 1 {
                "print((1, 2)".to_string()
            } else {
                "print(1)".to_string()
            })
        }));
        let task = h.task(3).await;

        let report = h.correction_loop(generator).run(&task, CancellationToken::new()).await;

        assert_eq!(report.status, CorrectionStatus::Succeeded);
        assert_eq!(report.outcomes[0].category, Some(FailureCategory::ValidationError));
        assert_eq!(h.sandbox.executions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_resumed_task_keeps_spent_attempts() {
        let h = harness().await;
        let generator = Arc::new(ScriptedCodeGenerator::new(|_| Ok(FAILING.to_string())));
        let mut task = h.task(3).await;
        task.attempt_count = 2;

        let report = h.correction_loop(generator).run(&task, CancellationToken::new()).await;

        assert_eq!(report.attempts, 3);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.status, CorrectionStatus::Exhausted);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let h = harness().await;
        let generator = Arc::new(ScriptedCodeGenerator::echo());
        let task = h.task(3).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = h.correction_loop(generator).run(&task, cancel).await;
        assert_eq!(report.status, CorrectionStatus::Cancelled);
        assert_eq!(report.attempts, 0);
    }

    /// Generator that never answers within a test's lifetime.
    struct StalledGenerator;

    #[async_trait::async_trait]
    impl CodeGenerator for StalledGenerator {
        async fn generate(&self, _request: &GenerationRequest) -> crate::domain::errors::GeneratorResult<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("print(1)".to_string())
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_generation() {
        let h = harness().await;
        let task = h.task(3).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let report = h.correction_loop(Arc::new(StalledGenerator)).run(&task, cancel).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.status, CorrectionStatus::Cancelled);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].category, Some(FailureCategory::Cancelled));
        assert!(h.sandbox.executions().await.is_empty());
    }

    #[tokio::test]
    async fn test_reflection_note_is_passed_on_regeneration() {
        let h = harness().await;
        let signature = ErrorSignature::normalize(FailureCategory::RuntimeError, "E_IMPORT: cannot import helper");
        h.memory
            .record_note(&crate::domain::models::ReflectionNote::new(
                signature.key(),
                "seen 4 time(s) across 2 task(s), 0 recovered",
                4,
            ))
            .await
            .unwrap();

        let generator = Arc::new(ScriptedCodeGenerator::new(|_| Ok(FAILING.to_string())));
        let task = h.task(2).await;
        h.correction_loop(generator.clone()).run(&task, CancellationToken::new()).await;

        let requests = generator.requests().await;
        assert!(requests[0].previous.is_none());
        let previous = requests[1].previous.as_ref().unwrap();
        assert_eq!(
            previous.reflection_note.as_deref(),
            Some("seen 4 time(s) across 2 task(s), 0 recovered")
        );
    }

    #[tokio::test]
    async fn test_example_prefers_same_description() {
        let h = harness().await;
        let knowledge = KnowledgeStore::new(vec![h.memory.clone()], Duration::from_secs(1));
        for _ in 0..3 {
            knowledge
                .record_success_pattern(TaskKind::CodeExecution, "plot prices", "print('plot')")
                .await;
        }
        knowledge
            .record_success_pattern(TaskKind::CodeExecution, "say hi", "print('hi')")
            .await;

        let generator = Arc::new(ScriptedCodeGenerator::echo());
        let task = h.task(1).await;
        h.correction_loop(generator.clone()).run(&task, CancellationToken::new()).await;

        let requests = generator.requests().await;
        assert_eq!(requests[0].example.as_deref(), Some("print('hi')"));
    }

    #[test]
    fn test_describe_fix_prefers_hint() {
        assert_eq!(describe_fix("a", "b", Some(" use vendored copy ")), "use vendored copy");
        assert_eq!(describe_fix("a\nb", "a\nc\nd", None), "regenerated: +2/-1 lines");
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("héllo", 4), "llo");
        assert_eq!(tail("abc", 10), "abc");
    }
}
