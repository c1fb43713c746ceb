//! SQLite implementation of the PlanRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_optional_datetime, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ErrorSignature, ExecutionOutcome, ExitStatus, FailureCategory, Plan, PlanStatus, Task,
    TaskKind, TaskStatus,
};
use crate::domain::ports::PlanRepository;

#[derive(Clone)]
pub struct SqlitePlanRepository {
    pool: SqlitePool,
}

impl SqlitePlanRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_dependencies(&self, task: &mut Task) -> DomainResult<()> {
        let deps: Vec<(String,)> = sqlx::query_as(
            "SELECT depends_on_id FROM task_dependencies WHERE task_id = ? ORDER BY rowid"
        )
        .bind(task.id.to_string())
        .fetch_all(&self.pool)
        .await?;

        task.depends_on = deps
            .iter()
            .map(|(id,)| parse_uuid(id))
            .collect::<DomainResult<_>>()?;

        Ok(())
    }
}

#[async_trait]
impl PlanRepository for SqlitePlanRepository {
    async fn save_plan(&self, plan: &Plan) -> DomainResult<()> {
        let task_ids = serde_json::to_string(&plan.task_ids)?;

        sqlx::query(
            r#"INSERT INTO plans (id, goal, task_ids, status, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)"#
        )
        .bind(plan.id.to_string())
        .bind(&plan.goal)
        .bind(&task_ids)
        .bind(plan.status.as_str())
        .bind(format_datetime(plan.created_at))
        .bind(format_datetime(plan.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_plan(&self, plan: &Plan) -> DomainResult<()> {
        let task_ids = serde_json::to_string(&plan.task_ids)?;

        let result = sqlx::query(
            "UPDATE plans SET goal = ?, task_ids = ?, status = ?, updated_at = ? WHERE id = ?"
        )
        .bind(&plan.goal)
        .bind(&task_ids)
        .bind(plan.status.as_str())
        .bind(format_datetime(plan.updated_at))
        .bind(plan.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::PlanNotFound(plan.id));
        }

        Ok(())
    }

    async fn insert_tasks(&self, tasks: &[Task]) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;

        for (position, task) in tasks.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO tasks (id, plan_id, key, description, kind, status, attempt_count,
                   max_attempts, code, last_outcome_id, blocked_reason, position,
                   created_at, updated_at, started_at, completed_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
            )
            .bind(task.id.to_string())
            .bind(task.plan_id.to_string())
            .bind(&task.key)
            .bind(&task.description)
            .bind(task.kind.as_str())
            .bind(task.status.as_str())
            .bind(i64::from(task.attempt_count))
            .bind(i64::from(task.max_attempts))
            .bind(&task.code)
            .bind(task.last_outcome_id.map(|id| id.to_string()))
            .bind(&task.blocked_reason)
            .bind(i64::try_from(position).unwrap_or(i64::MAX))
            .bind(format_datetime(task.created_at))
            .bind(format_datetime(task.updated_at))
            .bind(task.started_at.map(format_datetime))
            .bind(task.completed_at.map(format_datetime))
            .execute(&mut *tx)
            .await?;
        }

        // Edges go in after every row exists so foreign keys hold.
        for task in tasks {
            for dep_id in &task.depends_on {
                sqlx::query(
                    "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id) VALUES (?, ?)"
                )
                .bind(task.id.to_string())
                .bind(dep_id.to_string())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE tasks SET status = ?, attempt_count = ?, max_attempts = ?, code = ?,
               last_outcome_id = ?, blocked_reason = ?, updated_at = ?, started_at = ?,
               completed_at = ?
               WHERE id = ?"#
        )
        .bind(task.status.as_str())
        .bind(i64::from(task.attempt_count))
        .bind(i64::from(task.max_attempts))
        .bind(&task.code)
        .bind(task.last_outcome_id.map(|id| id.to_string()))
        .bind(&task.blocked_reason)
        .bind(format_datetime(task.updated_at))
        .bind(task.started_at.map(format_datetime))
        .bind(task.completed_at.map(format_datetime))
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::TaskNotFound(task.id));
        }

        Ok(())
    }

    async fn load_plan(&self, plan_id: Uuid) -> DomainResult<Option<Plan>> {
        let row: Option<PlanRow> = sqlx::query_as("SELECT * FROM plans WHERE id = ?")
            .bind(plan_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn load_tasks(&self, plan_id: Uuid) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE plan_id = ? ORDER BY position"
        )
        .bind(plan_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let mut task: Task = row.try_into()?;
            self.load_dependencies(&mut task).await?;
            tasks.push(task);
        }
        Ok(tasks)
    }

    async fn list_plans(&self, limit: usize) -> DomainResult<Vec<Plan>> {
        let rows: Vec<PlanRow> = sqlx::query_as(
            "SELECT * FROM plans ORDER BY created_at DESC LIMIT ?"
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn append_outcome(&self, outcome: &ExecutionOutcome) -> DomainResult<()> {
        let artifact_paths = serde_json::to_string(&outcome.artifact_paths)?;

        sqlx::query(
            r#"INSERT INTO execution_outcomes (id, task_id, attempt, exit_status, category,
               exit_code, stdout, stderr, signature, artifact_paths, duration_ms, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
        )
        .bind(outcome.id.to_string())
        .bind(outcome.task_id.to_string())
        .bind(i64::from(outcome.attempt))
        .bind(outcome.exit_status.as_str())
        .bind(outcome.category.map(|c| c.as_str()))
        .bind(outcome.exit_code)
        .bind(&outcome.stdout)
        .bind(&outcome.stderr)
        .bind(outcome.signature.as_ref().map(ErrorSignature::key))
        .bind(&artifact_paths)
        .bind(i64::try_from(outcome.duration_ms).unwrap_or(i64::MAX))
        .bind(format_datetime(outcome.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn outcomes_for_task(&self, task_id: Uuid) -> DomainResult<Vec<ExecutionOutcome>> {
        let rows: Vec<OutcomeRow> = sqlx::query_as(
            "SELECT * FROM execution_outcomes WHERE task_id = ? ORDER BY attempt, created_at"
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn recent_outcomes(&self, limit: usize) -> DomainResult<Vec<ExecutionOutcome>> {
        let rows: Vec<OutcomeRow> = sqlx::query_as(
            "SELECT * FROM execution_outcomes ORDER BY created_at DESC LIMIT ?"
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: String,
    goal: String,
    task_ids: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<PlanRow> for Plan {
    type Error = DomainError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        let status = PlanStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid plan status: {}", row.status)))?;

        Ok(Plan {
            id: parse_uuid(&row.id)?,
            goal: row.goal,
            task_ids: serde_json::from_str(&row.task_ids)?,
            status,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    plan_id: String,
    key: String,
    description: String,
    kind: String,
    status: String,
    attempt_count: i64,
    max_attempts: i64,
    code: Option<String>,
    last_outcome_id: Option<String>,
    blocked_reason: Option<String>,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;

        let kind = TaskKind::from_str(&row.kind)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid task kind: {}", row.kind)))?;

        let counter = |value: i64| {
            u32::try_from(value).map_err(|e| DomainError::SerializationError(e.to_string()))
        };

        Ok(Task {
            id: parse_uuid(&row.id)?,
            plan_id: parse_uuid(&row.plan_id)?,
            key: row.key,
            description: row.description,
            kind,
            depends_on: Vec::new(),
            status,
            attempt_count: counter(row.attempt_count)?,
            max_attempts: counter(row.max_attempts)?,
            code: row.code,
            last_outcome_id: parse_optional_uuid(row.last_outcome_id)?,
            blocked_reason: row.blocked_reason,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OutcomeRow {
    id: String,
    task_id: String,
    attempt: i64,
    exit_status: String,
    category: Option<String>,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    signature: Option<String>,
    artifact_paths: String,
    duration_ms: i64,
    created_at: String,
}

impl TryFrom<OutcomeRow> for ExecutionOutcome {
    type Error = DomainError;

    fn try_from(row: OutcomeRow) -> Result<Self, Self::Error> {
        let exit_status = ExitStatus::from_str(&row.exit_status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid exit status: {}", row.exit_status)))?;

        let category = row
            .category
            .map(|c| {
                FailureCategory::from_str(&c)
                    .ok_or_else(|| DomainError::SerializationError(format!("Invalid failure category: {c}")))
            })
            .transpose()?;

        let signature = row
            .signature
            .map(|s| {
                ErrorSignature::parse_key(&s)
                    .ok_or_else(|| DomainError::SerializationError(format!("Invalid signature: {s}")))
            })
            .transpose()?;

        Ok(ExecutionOutcome {
            id: parse_uuid(&row.id)?,
            task_id: parse_uuid(&row.task_id)?,
            attempt: u32::try_from(row.attempt).map_err(|e| DomainError::SerializationError(e.to_string()))?,
            exit_status,
            category,
            exit_code: row.exit_code,
            stdout: row.stdout,
            stderr: row.stderr,
            signature,
            artifact_paths: serde_json::from_str(&row.artifact_paths)?,
            duration_ms: u64::try_from(row.duration_ms).unwrap_or_default(),
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
