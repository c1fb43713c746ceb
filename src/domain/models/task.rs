//! Task domain model.
//!
//! Tasks are discrete units of generated code that the scheduler runs in a
//! sandbox. They form a DAG with dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is defined but dependencies not met
    Pending,
    /// Every dependency has succeeded; waiting for a worker
    Ready,
    /// Task is owned by a worker
    Running,
    /// Task completed successfully
    Succeeded,
    /// Task was interrupted (cancellation); becomes pending again on resume
    Failed,
    /// Retry budget exhausted, or a dependency is blocked
    Blocked,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "running" => Some(Self::Running),
            "succeeded" | "success" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Blocked)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> Vec<TaskStatus> {
        match self {
            Self::Pending => vec![Self::Ready, Self::Blocked],
            Self::Ready => vec![Self::Running, Self::Pending, Self::Blocked],
            Self::Running => vec![Self::Succeeded, Self::Failed, Self::Blocked],
            Self::Failed => vec![Self::Pending, Self::Blocked],
            Self::Succeeded | Self::Blocked => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of task kinds the scheduler knows how to dispatch.
///
/// The kind selects the boilerplate the validator wraps around bare code and
/// the bucket success patterns are recorded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    CodeExecution,
    Research,
    DataAnalysis,
}

impl Default for TaskKind {
    fn default() -> Self {
        Self::CodeExecution
    }
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeExecution => "code_execution",
            Self::Research => "research",
            Self::DataAnalysis => "data_analysis",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "code_execution" | "code" => Some(Self::CodeExecution),
            "research" => Some(Self::Research),
            "data_analysis" | "analysis" => Some(Self::DataAnalysis),
            _ => None,
        }
    }
}

/// A task as declared by the decomposition step, before graph validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Plan-local identifier (e.g. `T1`)
    pub key: String,
    /// What the task should accomplish
    pub description: String,
    #[serde(default)]
    pub kind: TaskKind,
    /// Keys of tasks this one depends on
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Overrides the scheduler default when set
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Pre-generated code; when absent the generator is asked first
    #[serde(default)]
    pub code: Option<String>,
}

impl TaskDescriptor {
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            kind: TaskKind::default(),
            depends_on: Vec::new(),
            max_attempts: None,
            code: None,
        }
    }

    pub fn depends_on(mut self, key: impl Into<String>) -> Self {
        self.depends_on.push(key.into());
        self
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// A unit of work tracked by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    /// Owning plan
    pub plan_id: Uuid,
    /// Plan-local key from the descriptor
    pub key: String,
    /// Detailed description/prompt
    pub description: String,
    pub kind: TaskKind,
    /// Task IDs this depends on
    pub depends_on: Vec<Uuid>,
    pub status: TaskStatus,
    /// Number of `Executing` entries so far
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Latest generated code artifact
    pub code: Option<String>,
    /// Latest execution outcome
    pub last_outcome_id: Option<Uuid>,
    /// Why the task is blocked, if it is
    pub blocked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task belonging to `plan_id`.
    pub fn new(plan_id: Uuid, key: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            plan_id,
            key: key.into(),
            description: description.into(),
            kind: TaskKind::default(),
            depends_on: Vec::new(),
            status: TaskStatus::default(),
            attempt_count: 0,
            max_attempts: 3,
            code: None,
            last_outcome_id: None,
            blocked_reason: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Add a dependency. Self-loops and duplicates are ignored.
    pub fn with_dependency(mut self, task_id: Uuid) -> Self {
        if !self.depends_on.contains(&task_id) && task_id != self.id {
            self.depends_on.push(task_id);
        }
        self
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to new status.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> Result<(), String> {
        if !self.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.status.as_str(),
                new_status.as_str()
            ));
        }

        self.status = new_status;
        self.updated_at = Utc::now();

        match new_status {
            TaskStatus::Running => self.started_at = Some(Utc::now()),
            TaskStatus::Succeeded | TaskStatus::Blocked => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }

        Ok(())
    }

    /// Block the task with a reason.
    pub fn block(&mut self, reason: impl Into<String>) -> Result<(), String> {
        self.transition_to(TaskStatus::Blocked)?;
        self.blocked_reason = Some(reason.into());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether another `Executing` entry fits in the retry budget.
    pub fn has_attempts_left(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}
