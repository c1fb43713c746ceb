//! Artifact records written by the artifact emitter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle point an artifact belongs to. Each point is emitted at most once
/// per plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "point", rename_all = "snake_case")]
pub enum LifecyclePoint {
    /// Emitted right after successful decomposition
    Overview,
    /// Emitted when a task reaches a terminal status
    TaskFragment { task_id: Uuid },
    /// Emitted when the plan reaches a terminal status
    Summary,
    /// Generated code kept for one attempt
    GeneratedFile { task_id: Uuid, attempt: u32 },
}

impl LifecyclePoint {
    /// Idempotency key recorded in the artifact ledger.
    pub fn key(&self) -> String {
        match self {
            Self::Overview => "overview".to_string(),
            Self::TaskFragment { task_id } => format!("task:{task_id}"),
            Self::Summary => "summary".to_string(),
            Self::GeneratedFile { task_id, attempt } => format!("code:{task_id}:{attempt}"),
        }
    }
}

/// One append-only ledger line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub plan_id: Uuid,
    pub key: String,
    pub point: LifecyclePoint,
    /// Markdown body appended to the plan report, or the file path for
    /// generated files
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    pub fn new(plan_id: Uuid, point: LifecyclePoint, content: impl Into<String>) -> Self {
        Self {
            plan_id,
            key: point.key(),
            point,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_distinct_per_point() {
        let task_id = Uuid::new_v4();
        let keys = [
            LifecyclePoint::Overview.key(),
            LifecyclePoint::TaskFragment { task_id }.key(),
            LifecyclePoint::Summary.key(),
            LifecyclePoint::GeneratedFile { task_id, attempt: 1 }.key(),
        ];
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
    }
}
