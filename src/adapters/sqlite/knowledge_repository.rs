//! SQLite layer of the knowledge store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::{format_datetime, parse_datetime};
use crate::domain::errors::{KnowledgeError, KnowledgeResult};
use crate::domain::models::{ErrorSignature, KnowledgeEntry, ReflectionNote, SuccessPattern, TaskKind};
use crate::domain::ports::KnowledgeBackend;

/// Durable knowledge backend. Upserts are single statements, so concurrent
/// writers for one signature never lose a counter increment.
#[derive(Clone)]
pub struct SqliteKnowledgeBackend {
    pool: SqlitePool,
}

impl SqliteKnowledgeBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KnowledgeBackend for SqliteKnowledgeBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn initialize(&self) -> KnowledgeResult<()> {
        sqlx::query("SELECT 1 FROM knowledge_entries LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| KnowledgeError::Unavailable(format!("sqlite: {e}")))?;
        Ok(())
    }

    async fn flush(&self) -> KnowledgeResult<()> {
        Ok(())
    }

    async fn lookup(&self, signature: &ErrorSignature) -> KnowledgeResult<Option<KnowledgeEntry>> {
        let row: Option<EntryRow> = sqlx::query_as("SELECT * FROM knowledge_entries WHERE signature = ?")
            .bind(signature.key())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn candidates(&self, signature: &ErrorSignature) -> KnowledgeResult<Vec<KnowledgeEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            "SELECT * FROM knowledge_entries WHERE category = ? AND error_class = ?"
        )
        .bind(signature.category.as_str())
        .bind(&signature.error_class)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn record(&self, entry: &KnowledgeEntry) -> KnowledgeResult<()> {
        sqlx::query(
            r#"INSERT INTO knowledge_entries (signature, category, error_class, fix_description,
               fix_code, success_count, created_at, last_used_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(signature) DO UPDATE SET
                   success_count = success_count + excluded.success_count,
                   fix_description = CASE WHEN excluded.last_used_at >= last_used_at
                       THEN excluded.fix_description ELSE fix_description END,
                   fix_code = CASE WHEN excluded.last_used_at >= last_used_at
                       THEN excluded.fix_code ELSE fix_code END,
                   last_used_at = MAX(last_used_at, excluded.last_used_at)"#
        )
        .bind(&entry.signature)
        .bind(entry.parsed.category.as_str())
        .bind(&entry.parsed.error_class)
        .bind(&entry.fix_description)
        .bind(&entry.fix_code)
        .bind(i64::try_from(entry.success_count).unwrap_or(i64::MAX))
        .bind(format_datetime(entry.created_at))
        .bind(format_datetime(entry.last_used_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_success_pattern(&self, kind: TaskKind, digest: &str, code: &str) -> KnowledgeResult<()> {
        sqlx::query(
            r#"INSERT INTO success_patterns (kind, description_digest, code, success_count, last_used_at)
               VALUES (?, ?, ?, 1, ?)
               ON CONFLICT(kind, description_digest, code) DO UPDATE SET
                   success_count = success_count + 1,
                   last_used_at = excluded.last_used_at"#
        )
        .bind(kind.as_str())
        .bind(digest)
        .bind(code)
        .bind(format_datetime(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn success_pattern(&self, kind: TaskKind, digest: &str) -> KnowledgeResult<Option<SuccessPattern>> {
        let row: Option<(String, String, i64, String)> = sqlx::query_as(
            r#"SELECT description_digest, code, success_count, last_used_at FROM success_patterns
               WHERE kind = ?
               ORDER BY description_digest = ? DESC, success_count DESC, last_used_at DESC LIMIT 1"#
        )
        .bind(kind.as_str())
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(description_digest, code, count, last_used_at)| {
            Ok(SuccessPattern {
                kind,
                description_digest,
                code,
                success_count: u64::try_from(count).unwrap_or_default(),
                last_used_at: parse_datetime(&last_used_at).map_err(|e| KnowledgeError::Backend(e.to_string()))?,
            })
        })
        .transpose()
    }

    async fn recent_entries(&self, limit: usize) -> KnowledgeResult<Vec<KnowledgeEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            "SELECT * FROM knowledge_entries ORDER BY last_used_at DESC LIMIT ?"
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn record_note(&self, note: &ReflectionNote) -> KnowledgeResult<()> {
        sqlx::query(
            r#"INSERT INTO reflection_notes (id, topic, note, evidence, created_at) VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(topic) DO UPDATE SET
                   note = excluded.note,
                   evidence = excluded.evidence,
                   created_at = excluded.created_at"#
        )
        .bind(note.id.to_string())
        .bind(&note.topic)
        .bind(&note.note)
        .bind(i64::try_from(note.evidence).unwrap_or(i64::MAX))
        .bind(format_datetime(note.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn note_for(&self, topic: &str) -> KnowledgeResult<Option<ReflectionNote>> {
        let row: Option<NoteRow> = sqlx::query_as("SELECT * FROM reflection_notes WHERE topic = ?")
            .bind(topic)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn recent_notes(&self, limit: usize) -> KnowledgeResult<Vec<ReflectionNote>> {
        let rows: Vec<NoteRow> = sqlx::query_as(
            "SELECT * FROM reflection_notes ORDER BY created_at DESC LIMIT ?"
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    signature: String,
    fix_description: String,
    fix_code: String,
    success_count: i64,
    created_at: String,
    last_used_at: String,
}

impl TryFrom<EntryRow> for KnowledgeEntry {
    type Error = KnowledgeError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let parsed = ErrorSignature::parse_key(&row.signature)
            .ok_or_else(|| KnowledgeError::Backend(format!("Invalid signature: {}", row.signature)))?;
        let to_error = |e: crate::domain::errors::DomainError| KnowledgeError::Backend(e.to_string());

        Ok(KnowledgeEntry {
            signature: row.signature,
            parsed,
            fix_description: row.fix_description,
            fix_code: row.fix_code,
            success_count: u64::try_from(row.success_count).unwrap_or_default(),
            created_at: parse_datetime(&row.created_at).map_err(to_error)?,
            last_used_at: parse_datetime(&row.last_used_at).map_err(to_error)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct NoteRow {
    id: String,
    topic: String,
    note: String,
    evidence: i64,
    created_at: String,
}

impl TryFrom<NoteRow> for ReflectionNote {
    type Error = KnowledgeError;

    fn try_from(row: NoteRow) -> Result<Self, Self::Error> {
        let to_error = |e: crate::domain::errors::DomainError| KnowledgeError::Backend(e.to_string());
        Ok(ReflectionNote {
            id: super::parse_uuid(&row.id).map_err(to_error)?,
            topic: row.topic,
            note: row.note,
            evidence: u64::try_from(row.evidence).unwrap_or_default(),
            created_at: parse_datetime(&row.created_at).map_err(to_error)?,
        })
    }
}
