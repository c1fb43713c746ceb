//! Capacity-bounded in-memory knowledge layer.
//!
//! Entries live in a [`DashMap`]; upserts go through the map's entry API so
//! the read-modify-write of one signature happens under a single shard lock.
//! When the map grows past its capacity the least recently accessed entry is
//! evicted. Success patterns share the same capacity and drop the least
//! recently used pattern first. An optional JSON snapshot file is merged in on
//! `initialize` and rewritten on `flush`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::domain::errors::{KnowledgeError, KnowledgeResult};
use crate::domain::models::{ErrorSignature, KnowledgeEntry, ReflectionNote, SuccessPattern, TaskKind};
use crate::domain::ports::KnowledgeBackend;

/// Notes kept in memory; older ones are dropped first.
const MAX_NOTES: usize = 256;

#[derive(Debug, Clone)]
struct Slot {
    entry: KnowledgeEntry,
    /// Logical access clock used for LRU eviction
    touched: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    entries: Vec<KnowledgeEntry>,
    #[serde(default)]
    patterns: Vec<SuccessPattern>,
    #[serde(default)]
    notes: Vec<ReflectionNote>,
}

/// Kind, description digest and code of a success pattern
type PatternKey = (TaskKind, String, String);

fn pattern_key(pattern: &SuccessPattern) -> PatternKey {
    (pattern.kind, pattern.description_digest.clone(), pattern.code.clone())
}

/// Knowledge backend held in process memory.
#[derive(Debug)]
pub struct InMemoryKnowledgeBackend {
    capacity: usize,
    snapshot_path: Option<PathBuf>,
    entries: DashMap<String, Slot>,
    patterns: DashMap<PatternKey, SuccessPattern>,
    /// Keyed by topic
    notes: DashMap<String, ReflectionNote>,
    clock: AtomicU64,
}

impl InMemoryKnowledgeBackend {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            snapshot_path: None,
            entries: DashMap::new(),
            patterns: DashMap::new(),
            notes: DashMap::new(),
            clock: AtomicU64::new(0),
        }
    }

    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn upsert(&self, entry: &KnowledgeEntry) {
        let touched = self.tick();
        self.entries
            .entry(entry.signature.clone())
            .and_modify(|slot| {
                slot.entry.merge(entry);
                slot.touched = touched;
            })
            .or_insert_with(|| Slot {
                entry: entry.clone(),
                touched,
            });
        self.evict_over_capacity();
    }

    fn evict_over_capacity(&self) {
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|slot| slot.touched)
                .map(|slot| (slot.key().clone(), slot.touched));
            let Some((key, touched)) = oldest else {
                return;
            };
            // Skip if another writer touched it meanwhile; the loop re-scans.
            if self.entries.remove_if(&key, |_, slot| slot.touched == touched).is_some() {
                tracing::debug!(signature = %key, "evicted knowledge entry");
            }
        }
    }

    fn evict_patterns_over_capacity(&self) {
        while self.patterns.len() > self.capacity {
            let oldest = self
                .patterns
                .iter()
                .min_by_key(|p| p.last_used_at)
                .map(|p| p.key().clone());
            let Some(key) = oldest else {
                return;
            };
            self.patterns.remove(&key);
        }
    }

    fn upsert_note(&self, note: &ReflectionNote) {
        self.notes
            .entry(note.topic.clone())
            .and_modify(|existing| {
                existing.note = note.note.clone();
                existing.evidence = note.evidence;
                existing.created_at = note.created_at;
            })
            .or_insert_with(|| note.clone());
        while self.notes.len() > MAX_NOTES {
            let oldest = self
                .notes
                .iter()
                .min_by_key(|n| n.created_at)
                .map(|n| n.key().clone());
            let Some(topic) = oldest else {
                return;
            };
            self.notes.remove(&topic);
        }
    }

    async fn load_snapshot(&self) -> KnowledgeResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(KnowledgeError::Backend(format!("read {}: {e}", path.display()))),
        };

        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        let loaded = snapshot.entries.len();
        for entry in &snapshot.entries {
            self.upsert(entry);
        }
        for pattern in snapshot.patterns {
            self.patterns.insert(pattern_key(&pattern), pattern);
        }
        self.evict_patterns_over_capacity();
        for note in snapshot.notes {
            self.upsert_note(&note);
        }
        tracing::info!(path = %path.display(), entries = loaded, "loaded knowledge snapshot");
        Ok(())
    }
}

#[async_trait]
impl KnowledgeBackend for InMemoryKnowledgeBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn initialize(&self) -> KnowledgeResult<()> {
        self.load_snapshot().await
    }

    async fn flush(&self) -> KnowledgeResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let snapshot = Snapshot {
            entries: self.entries.iter().map(|slot| slot.entry.clone()).collect(),
            patterns: self.patterns.iter().map(|p| p.value().clone()).collect(),
            notes: self.notes.iter().map(|n| n.value().clone()).collect(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| KnowledgeError::Backend(e.to_string()))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| KnowledgeError::Backend(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| KnowledgeError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn lookup(&self, signature: &ErrorSignature) -> KnowledgeResult<Option<KnowledgeEntry>> {
        let touched = self.tick();
        Ok(self.entries.get_mut(&signature.key()).map(|mut slot| {
            slot.touched = touched;
            slot.entry.clone()
        }))
    }

    async fn candidates(&self, signature: &ErrorSignature) -> KnowledgeResult<Vec<KnowledgeEntry>> {
        Ok(self
            .entries
            .iter()
            .filter(|slot| {
                slot.entry.parsed.category == signature.category
                    && slot.entry.parsed.error_class == signature.error_class
            })
            .map(|slot| slot.entry.clone())
            .collect())
    }

    async fn record(&self, entry: &KnowledgeEntry) -> KnowledgeResult<()> {
        self.upsert(entry);
        Ok(())
    }

    async fn record_success_pattern(&self, kind: TaskKind, digest: &str, code: &str) -> KnowledgeResult<()> {
        let now = Utc::now();
        self.patterns
            .entry((kind, digest.to_string(), code.to_string()))
            .and_modify(|p| {
                p.success_count += 1;
                p.last_used_at = now;
            })
            .or_insert_with(|| SuccessPattern {
                kind,
                description_digest: digest.to_string(),
                code: code.to_string(),
                success_count: 1,
                last_used_at: now,
            });
        self.evict_patterns_over_capacity();
        Ok(())
    }

    async fn success_pattern(&self, kind: TaskKind, digest: &str) -> KnowledgeResult<Option<SuccessPattern>> {
        Ok(self
            .patterns
            .iter()
            .filter(|p| p.kind == kind)
            .max_by(|a, b| {
                (a.description_digest == digest)
                    .cmp(&(b.description_digest == digest))
                    .then(a.success_count.cmp(&b.success_count))
                    .then(a.last_used_at.cmp(&b.last_used_at))
            })
            .map(|p| p.value().clone()))
    }

    async fn recent_entries(&self, limit: usize) -> KnowledgeResult<Vec<KnowledgeEntry>> {
        let mut entries: Vec<KnowledgeEntry> = self.entries.iter().map(|slot| slot.entry.clone()).collect();
        entries.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn record_note(&self, note: &ReflectionNote) -> KnowledgeResult<()> {
        self.upsert_note(note);
        Ok(())
    }

    async fn note_for(&self, topic: &str) -> KnowledgeResult<Option<ReflectionNote>> {
        Ok(self.notes.get(topic).map(|n| n.value().clone()))
    }

    async fn recent_notes(&self, limit: usize) -> KnowledgeResult<Vec<ReflectionNote>> {
        let mut notes: Vec<ReflectionNote> = self.notes.iter().map(|n| n.value().clone()).collect();
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        notes.truncate(limit);
        Ok(notes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::models::{FailureCategory, Fix};

    fn signature(message: &str) -> ErrorSignature {
        ErrorSignature::normalize(FailureCategory::RuntimeError, &format!("KeyError: {message}"))
    }

    #[tokio::test]
    async fn test_record_then_lookup() {
        let backend = InMemoryKnowledgeBackend::new(8);
        let sig = signature("price");
        backend.record(&KnowledgeEntry::new(&sig, &Fix::new("use close", "x"))).await.unwrap();

        let entry = backend.lookup(&sig).await.unwrap().unwrap();
        assert_eq!(entry.fix_description, "use close");
        assert!(backend.lookup(&signature("volume")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lru_eviction_keeps_recently_used() {
        let backend = InMemoryKnowledgeBackend::new(2);
        let a = signature("alpha");
        let b = signature("beta");
        let c = signature("gamma");
        backend.record(&KnowledgeEntry::new(&a, &Fix::new("a", "a"))).await.unwrap();
        backend.record(&KnowledgeEntry::new(&b, &Fix::new("b", "b"))).await.unwrap();

        // Touch `a` so `b` becomes the eviction candidate.
        backend.lookup(&a).await.unwrap();
        backend.record(&KnowledgeEntry::new(&c, &Fix::new("c", "c"))).await.unwrap();

        assert_eq!(backend.len(), 2);
        assert!(backend.lookup(&a).await.unwrap().is_some());
        assert!(backend.lookup(&b).await.unwrap().is_none());
        assert!(backend.lookup(&c).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_records_sum_counters() {
        let backend = Arc::new(InMemoryKnowledgeBackend::new(16));
        let sig = signature("price");

        let mut handles = Vec::new();
        for i in 0..32 {
            let backend = Arc::clone(&backend);
            let sig = sig.clone();
            handles.push(tokio::spawn(async move {
                backend
                    .record(&KnowledgeEntry::new(&sig, &Fix::new(format!("fix {i}"), "code")))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(backend.lookup(&sig).await.unwrap().unwrap().success_count, 32);
    }

    #[tokio::test]
    async fn test_snapshot_flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.json");
        let sig = signature("price");

        let first = InMemoryKnowledgeBackend::new(8).with_snapshot(&path);
        first.record(&KnowledgeEntry::new(&sig, &Fix::new("use close", "x"))).await.unwrap();
        first.record_success_pattern(TaskKind::Research, "d", "print(1)").await.unwrap();
        first.record_note(&ReflectionNote::new(sig.key(), "seen twice", 2)).await.unwrap();
        first.flush().await.unwrap();

        let second = InMemoryKnowledgeBackend::new(8).with_snapshot(&path);
        second.initialize().await.unwrap();
        assert_eq!(second.lookup(&sig).await.unwrap().unwrap().fix_code, "x");
        assert_eq!(
            second.success_pattern(TaskKind::Research, "d").await.unwrap().unwrap().code,
            "print(1)"
        );
        assert_eq!(second.note_for(&sig.key()).await.unwrap().unwrap().evidence, 2);
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = InMemoryKnowledgeBackend::new(8).with_snapshot(dir.path().join("absent.json"));
        backend.initialize().await.unwrap();
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_success_patterns_are_bounded_by_capacity() {
        let backend = InMemoryKnowledgeBackend::new(2);
        backend.record_success_pattern(TaskKind::Research, "d", "print(1)").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        backend.record_success_pattern(TaskKind::Research, "d", "print(2)").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        backend.record_success_pattern(TaskKind::Research, "d", "print(3)").await.unwrap();

        assert_eq!(backend.patterns.len(), 2);
        assert!(!backend.patterns.contains_key(&(TaskKind::Research, "d".to_string(), "print(1)".to_string())));
    }

    #[tokio::test]
    async fn test_success_pattern_prefers_matching_digest() {
        let backend = InMemoryKnowledgeBackend::new(8);
        backend.record_success_pattern(TaskKind::Research, "plot", "plot()").await.unwrap();
        backend.record_success_pattern(TaskKind::Research, "plot", "plot()").await.unwrap();
        backend.record_success_pattern(TaskKind::Research, "fetch", "fetch()").await.unwrap();

        let pattern = backend.success_pattern(TaskKind::Research, "fetch").await.unwrap().unwrap();
        assert_eq!(pattern.code, "fetch()");
        let fallback = backend.success_pattern(TaskKind::Research, "other").await.unwrap().unwrap();
        assert_eq!(fallback.code, "plot()");
    }

    #[tokio::test]
    async fn test_notes_replace_by_topic() {
        let backend = InMemoryKnowledgeBackend::new(8);
        let first = ReflectionNote::new("sig", "seen once", 1);
        backend.record_note(&first).await.unwrap();
        backend.record_note(&ReflectionNote::new("sig", "seen twice", 2)).await.unwrap();

        let note = backend.note_for("sig").await.unwrap().unwrap();
        assert_eq!(note.id, first.id);
        assert_eq!(note.note, "seen twice");
        assert_eq!(backend.recent_notes(10).await.unwrap().len(), 1);
    }
}
