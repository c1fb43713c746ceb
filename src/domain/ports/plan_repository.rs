use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ExecutionOutcome, Plan, Task};

/// Repository port for plan, task and outcome persistence.
///
/// The scheduler is the only writer of plan and task rows; workers append
/// outcomes as attempts finish.
#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Insert a new plan
    async fn save_plan(&self, plan: &Plan) -> DomainResult<()>;

    /// Update plan status and task ordering
    async fn update_plan(&self, plan: &Plan) -> DomainResult<()>;

    /// Insert tasks and their dependency edges in one transaction
    async fn insert_tasks(&self, tasks: &[Task]) -> DomainResult<()>;

    /// Update a single task row
    async fn update_task(&self, task: &Task) -> DomainResult<()>;

    async fn load_plan(&self, plan_id: Uuid) -> DomainResult<Option<Plan>>;

    /// Tasks of a plan in the plan's stored order
    async fn load_tasks(&self, plan_id: Uuid) -> DomainResult<Vec<Task>>;

    /// Most recently created plans first
    async fn list_plans(&self, limit: usize) -> DomainResult<Vec<Plan>>;

    /// Append an immutable outcome record
    async fn append_outcome(&self, outcome: &ExecutionOutcome) -> DomainResult<()>;

    /// Outcome history of a task ordered by attempt
    async fn outcomes_for_task(&self, task_id: Uuid) -> DomainResult<Vec<ExecutionOutcome>>;

    /// Latest outcomes across all plans, newest first
    async fn recent_outcomes(&self, limit: usize) -> DomainResult<Vec<ExecutionOutcome>>;
}
