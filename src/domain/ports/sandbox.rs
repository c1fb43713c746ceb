use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::ExecutionOutcome;

/// One attempt to execute a task's code.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub plan_id: Uuid,
    pub task_id: Uuid,
    pub attempt: u32,
    pub code: String,
    /// Isolated per-task directory, created by the sandbox if missing
    pub work_dir: PathBuf,
    /// Hard wall-clock limit
    pub timeout: Duration,
    /// Cancelling terminates the running attempt
    pub cancel: CancellationToken,
}

/// Port for isolated, resource-bounded execution.
///
/// Task failures (non-zero exit, timeout, missing dependency, cancellation)
/// are reported inside the returned outcome. `Err` is reserved for the
/// sandbox itself being unusable, e.g. the working directory can't be
/// created.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn execute(&self, request: SandboxRequest) -> DomainResult<ExecutionOutcome>;
}
