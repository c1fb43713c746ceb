//! External code generation collaborators.
//!
//! How code is produced is outside this crate; these ports only fix the
//! request shape and the error contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::GeneratorResult;
use crate::domain::models::{ErrorSignature, Fix, TaskKind};

/// Context from the previous failed attempt, passed on regeneration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptContext {
    pub failing_code: String,
    pub signature: ErrorSignature,
    /// Tail of the failing attempt's stderr
    pub stderr_excerpt: String,
    /// Fix reused from the knowledge store
    pub knowledge_hint: Option<Fix>,
    /// Free-form hint from the fix suggester
    pub suggester_hint: Option<String>,
    /// Reflection note on the failing signature from earlier runs
    #[serde(default)]
    pub reflection_note: Option<String>,
}

/// Request sent to a [`CodeGenerator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub task_id: Uuid,
    pub task_key: String,
    pub description: String,
    pub kind: TaskKind,
    /// Attempt the generated code will run as
    pub attempt: u32,
    /// Present when regenerating after a failure
    pub previous: Option<AttemptContext>,
    /// Code that previously succeeded for this task kind
    pub example: Option<String>,
}

impl GenerationRequest {
    pub fn new(task_id: Uuid, task_key: impl Into<String>, description: impl Into<String>, kind: TaskKind, attempt: u32) -> Self {
        Self {
            task_id,
            task_key: task_key.into(),
            description: description.into(),
            kind,
            attempt,
            previous: None,
            example: None,
        }
    }

    pub fn with_previous(mut self, previous: AttemptContext) -> Self {
        self.previous = Some(previous);
        self
    }

    pub fn with_example(mut self, example: Option<String>) -> Self {
        self.example = example;
        self
    }

    /// Knowledge hint carried by this request, if any.
    pub fn knowledge_hint(&self) -> Option<&Fix> {
        self.previous.as_ref().and_then(|p| p.knowledge_hint.as_ref())
    }
}

/// Produces code for a task.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> GeneratorResult<String>;
}

/// Optional advisor asked for a fix hint before regeneration.
///
/// Errors are logged and ignored by the correction loop.
#[async_trait]
pub trait FixSuggester: Send + Sync {
    async fn suggest_fix(&self, signature: &ErrorSignature, failing_code: &str) -> GeneratorResult<Option<String>>;
}
