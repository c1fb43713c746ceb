//! Plan domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{Task, TaskStatus};

/// Overall status of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planning,
    Running,
    Completed,
    Failed,
}

impl Default for PlanStatus {
    fn default() -> Self {
        Self::Planning
    }
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "planning" => Some(Self::Planning),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A goal decomposed into an ordered set of tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    /// Original goal text
    pub goal: String,
    /// Task IDs in topological order
    pub task_ids: Vec<Uuid>,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            task_ids: Vec::new(),
            status: PlanStatus::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: PlanStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Final status of a plan from its tasks, or `None` while any task is open.
///
/// `Completed` when every task is succeeded or blocked and at least one
/// succeeded; `Failed` when every task ended blocked. An empty plan is
/// completed.
pub fn resolve_plan_status(tasks: &[Task]) -> Option<PlanStatus> {
    if tasks.iter().any(|t| !t.is_terminal()) {
        return None;
    }
    if tasks.is_empty() || tasks.iter().any(|t| t.status == TaskStatus::Succeeded) {
        Some(PlanStatus::Completed)
    } else {
        Some(PlanStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with(status: TaskStatus) -> Task {
        let mut task = Task::new(Uuid::new_v4(), "T", "d");
        task.status = status;
        task
    }

    #[test]
    fn test_open_tasks_keep_plan_running() {
        let tasks = vec![task_with(TaskStatus::Succeeded), task_with(TaskStatus::Pending)];
        assert_eq!(resolve_plan_status(&tasks), None);
    }

    #[test]
    fn test_mixed_terminal_is_completed() {
        let tasks = vec![task_with(TaskStatus::Succeeded), task_with(TaskStatus::Blocked)];
        assert_eq!(resolve_plan_status(&tasks), Some(PlanStatus::Completed));
    }

    #[test]
    fn test_all_blocked_is_failed() {
        let tasks = vec![task_with(TaskStatus::Blocked), task_with(TaskStatus::Blocked)];
        assert_eq!(resolve_plan_status(&tasks), Some(PlanStatus::Failed));
    }

    #[test]
    fn test_interrupted_task_is_not_terminal() {
        let tasks = vec![task_with(TaskStatus::Failed)];
        assert_eq!(resolve_plan_status(&tasks), None);
    }
}
