use async_trait::async_trait;

use crate::domain::errors::KnowledgeResult;
use crate::domain::models::{ErrorSignature, KnowledgeEntry, ReflectionNote, SuccessPattern, TaskKind};

/// One layer of the knowledge store.
///
/// Layers are consulted in order; `Ok(None)` means "not known here" and lets
/// the caller fall through to the next layer. Every upsert must be atomic per
/// key: two concurrent `record` calls for one signature sum their counters.
#[async_trait]
pub trait KnowledgeBackend: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Prepare the backend (load snapshots, check connectivity)
    async fn initialize(&self) -> KnowledgeResult<()>;

    /// Persist anything held only in memory
    async fn flush(&self) -> KnowledgeResult<()>;

    /// Exact lookup by canonical signature key
    async fn lookup(&self, signature: &ErrorSignature) -> KnowledgeResult<Option<KnowledgeEntry>>;

    /// Entries sharing category and error class, candidates for similarity
    async fn candidates(&self, signature: &ErrorSignature) -> KnowledgeResult<Vec<KnowledgeEntry>>;

    /// Upsert an entry, merging counters with any existing one
    async fn record(&self, entry: &KnowledgeEntry) -> KnowledgeResult<()>;

    /// Count a success of `code` for a task of `kind` whose description
    /// hashes to `digest`
    async fn record_success_pattern(&self, kind: TaskKind, digest: &str, code: &str) -> KnowledgeResult<()>;

    /// Most used success pattern for a task kind. Patterns recorded under
    /// `digest` win over the rest of the kind.
    async fn success_pattern(&self, kind: TaskKind, digest: &str) -> KnowledgeResult<Option<SuccessPattern>>;

    /// Most recently used entries, newest first
    async fn recent_entries(&self, limit: usize) -> KnowledgeResult<Vec<KnowledgeEntry>>;

    /// Upsert the note for `note.topic`
    async fn record_note(&self, note: &ReflectionNote) -> KnowledgeResult<()>;

    async fn note_for(&self, topic: &str) -> KnowledgeResult<Option<ReflectionNote>>;

    /// Most recently written notes, newest first
    async fn recent_notes(&self, limit: usize) -> KnowledgeResult<Vec<ReflectionNote>>;
}

