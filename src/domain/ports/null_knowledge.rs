//! Null knowledge backend implementation.
//!
//! Terminates the fallback chain so that every read resolves to `None` when
//! the real layers are unavailable.

use async_trait::async_trait;

use super::KnowledgeBackend;
use crate::domain::errors::KnowledgeResult;
use crate::domain::models::{ErrorSignature, KnowledgeEntry, ReflectionNote, SuccessPattern, TaskKind};

/// A no-op knowledge backend that stores nothing.
#[derive(Debug, Clone, Default)]
pub struct NullKnowledgeBackend;

impl NullKnowledgeBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl KnowledgeBackend for NullKnowledgeBackend {
    fn name(&self) -> &str {
        "null"
    }

    async fn initialize(&self) -> KnowledgeResult<()> {
        Ok(())
    }

    async fn flush(&self) -> KnowledgeResult<()> {
        Ok(())
    }

    async fn lookup(&self, _signature: &ErrorSignature) -> KnowledgeResult<Option<KnowledgeEntry>> {
        Ok(None)
    }

    async fn candidates(&self, _signature: &ErrorSignature) -> KnowledgeResult<Vec<KnowledgeEntry>> {
        Ok(Vec::new())
    }

    async fn record(&self, _entry: &KnowledgeEntry) -> KnowledgeResult<()> {
        Ok(())
    }

    async fn record_success_pattern(&self, _kind: TaskKind, _digest: &str, _code: &str) -> KnowledgeResult<()> {
        Ok(())
    }

    async fn success_pattern(&self, _kind: TaskKind, _digest: &str) -> KnowledgeResult<Option<SuccessPattern>> {
        Ok(None)
    }

    async fn recent_entries(&self, _limit: usize) -> KnowledgeResult<Vec<KnowledgeEntry>> {
        Ok(Vec::new())
    }

    async fn record_note(&self, _note: &ReflectionNote) -> KnowledgeResult<()> {
        Ok(())
    }

    async fn note_for(&self, _topic: &str) -> KnowledgeResult<Option<ReflectionNote>> {
        Ok(None)
    }

    async fn recent_notes(&self, _limit: usize) -> KnowledgeResult<Vec<ReflectionNote>> {
        Ok(Vec::new())
    }
}
