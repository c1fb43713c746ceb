//! Domain errors for the forgeloop orchestrator.

use thiserror::Error;
use uuid::Uuid;

/// Format a cycle path as a human-readable string: `A -> B -> C -> A`.
fn format_cycle_path(path: &[String]) -> String {
    path.join(" -> ")
}

/// Plan-level errors.
///
/// Structural errors (`DependencyCycle`, `UnknownDependency`, `DuplicateTask`)
/// abort a plan before any task executes. Task-level failures never surface
/// here; they are recorded as execution outcomes instead.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task dependency cycle detected: {}", format_cycle_path(.0))]
    DependencyCycle(Vec<String>),

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("Duplicate task key: {0}")]
    DuplicateTask(String),

    #[error("Plan not found: {0}")]
    PlanNotFound(Uuid),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

/// Errors raised by a knowledge backend layer.
///
/// These are never fatal: the knowledge store logs them and falls through to
/// the next layer.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("Knowledge backend {0} unavailable")]
    Unavailable(String),

    #[error("Knowledge backend {backend} timed out after {timeout_ms}ms")]
    Timeout { backend: String, timeout_ms: u64 },

    #[error("Knowledge backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for KnowledgeError {
    fn from(err: sqlx::Error) -> Self {
        KnowledgeError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for KnowledgeError {
    fn from(err: serde_json::Error) -> Self {
        KnowledgeError::Backend(err.to_string())
    }
}

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;

/// Errors raised by the external code generator or fix suggester.
///
/// The correction loop records these as `generation_error` attempts.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("No code generator configured")]
    NotConfigured,

    #[error("Generator timed out after {0}s")]
    Timeout(u64),

    #[error("Generator exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("Generator returned no code")]
    EmptyOutput,

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Generator I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generator request serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type GeneratorResult<T> = Result<T, GeneratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_formats_path() {
        let err = DomainError::DependencyCycle(vec!["A".into(), "B".into(), "A".into()]);
        assert_eq!(err.to_string(), "Task dependency cycle detected: A -> B -> A");
    }

    #[test]
    fn test_unknown_dependency_message() {
        let err = DomainError::UnknownDependency {
            task: "T2".into(),
            dependency: "T9".into(),
        };
        assert_eq!(err.to_string(), "Task T2 depends on unknown task T9");
    }

    #[test]
    fn test_generator_error_message() {
        let err = GeneratorError::Failed {
            code: Some(2),
            stderr: "rate limited".into(),
        };
        assert_eq!(err.to_string(), "Generator exited with Some(2): rate limited");
    }
}
