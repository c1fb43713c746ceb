//! Deterministic sandbox for tests and dry runs.
//!
//! The default behaviour reads directives from comment lines in the code:
//!
//! - `# fail: <stderr>` fails the attempt as a runtime error with that stderr
//! - `# sleep: <ms>` holds the attempt (cancellation still applies)
//! - `# print: <text>` appends a line to stdout
//!
//! Code without a `fail` directive succeeds.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ExecutionOutcome, FailureCategory};
use crate::domain::ports::{Sandbox, SandboxRequest};

type Handler = dyn Fn(&SandboxRequest) -> ExecutionOutcome + Send + Sync;

/// One recorded execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub task_id: Uuid,
    pub attempt: u32,
    pub code: String,
}

/// Sandbox whose outcomes are computed in-process.
pub struct ScriptedSandbox {
    handler: Arc<Handler>,
    executions: Mutex<Vec<ExecutionRecord>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedSandbox {
    /// Sandbox interpreting the comment directives described above.
    pub fn new() -> Self {
        Self::from_fn(interpret_directives)
    }

    pub fn from_fn(handler: impl Fn(&SandboxRequest) -> ExecutionOutcome + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            executions: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Every execution so far, in call order.
    pub async fn executions(&self) -> Vec<ExecutionRecord> {
        self.executions.lock().await.clone()
    }

    /// Highest number of executions that were in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn execute(&self, request: SandboxRequest) -> DomainResult<ExecutionOutcome> {
        self.executions.lock().await.push(ExecutionRecord {
            task_id: request.task_id,
            attempt: request.attempt,
            code: request.code.clone(),
        });

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);

        let delay = directive(&request.code, "sleep")
            .and_then(|ms| ms.parse::<u64>().ok())
            .map(Duration::from_millis);

        let outcome = match delay {
            Some(delay) if delay >= request.timeout => {
                tokio::select! {
                    () = tokio::time::sleep(request.timeout) => ExecutionOutcome::failure(
                        request.task_id,
                        request.attempt,
                        FailureCategory::TimeoutError,
                        "Timeout: scripted attempt exceeded its limit",
                    ),
                    () = request.cancel.cancelled() => cancelled(&request),
                }
            }
            Some(delay) => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => (self.handler)(&request),
                    () = request.cancel.cancelled() => cancelled(&request),
                }
            }
            None if request.cancel.is_cancelled() => cancelled(&request),
            None => (self.handler)(&request),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(outcome)
    }
}

fn cancelled(request: &SandboxRequest) -> ExecutionOutcome {
    ExecutionOutcome::failure(request.task_id, request.attempt, FailureCategory::Cancelled, "Cancelled: plan cancelled")
}

/// Value of the first `# <name>: value` line.
fn directive<'a>(code: &'a str, name: &str) -> Option<&'a str> {
    code.lines()
        .filter_map(|line| line.trim().strip_prefix('#'))
        .filter_map(|rest| rest.trim().strip_prefix(name))
        .find_map(|rest| rest.strip_prefix(':'))
        .map(str::trim)
}

fn interpret_directives(request: &SandboxRequest) -> ExecutionOutcome {
    if let Some(stderr) = directive(&request.code, "fail") {
        return ExecutionOutcome::failure(request.task_id, request.attempt, FailureCategory::RuntimeError, stderr)
            .with_exit_code(Some(1));
    }

    let stdout: Vec<&str> = request
        .code
        .lines()
        .filter_map(|line| line.trim().strip_prefix('#'))
        .filter_map(|rest| rest.trim().strip_prefix("print:"))
        .map(str::trim)
        .collect();
    ExecutionOutcome::success(request.task_id, request.attempt).with_stdout(stdout.join("\n"))
}
