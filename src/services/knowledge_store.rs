//! Knowledge Store Service
//!
//! An ordered chain of [`KnowledgeBackend`] layers. Reads walk the chain and
//! return the first answer; writes go to every layer. Every call into a layer
//! is bounded by a timeout, and a layer that errors or times out is logged and
//! skipped. Knowledge problems never fail a task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::domain::errors::{KnowledgeError, KnowledgeResult};
use crate::domain::models::{ErrorSignature, Fix, KnowledgeEntry, ReflectionNote, SuccessPattern, TaskKind};
use crate::domain::ports::KnowledgeBackend;

/// Layered knowledge store with per-layer timeouts.
#[derive(Clone)]
pub struct KnowledgeStore {
    layers: Vec<Arc<dyn KnowledgeBackend>>,
    layer_timeout: Duration,
}

impl KnowledgeStore {
    pub fn new(layers: Vec<Arc<dyn KnowledgeBackend>>, layer_timeout: Duration) -> Self {
        Self { layers, layer_timeout }
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    /// Run one layer call under the timeout; failures become `None`.
    async fn guarded<T, F>(&self, layer: &dyn KnowledgeBackend, operation: &'static str, call: F) -> Option<T>
    where
        F: Future<Output = KnowledgeResult<T>>,
    {
        let error = match tokio::time::timeout(self.layer_timeout, call).await {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(err)) => err,
            Err(_) => KnowledgeError::Timeout {
                backend: layer.name().to_string(),
                timeout_ms: u64::try_from(self.layer_timeout.as_millis()).unwrap_or(u64::MAX),
            },
        };
        warn!(
            backend = layer.name(),
            operation,
            error = %error,
            "Knowledge backend unavailable, skipping layer"
        );
        None
    }

    /// Initialize every layer. Returns how many came up.
    pub async fn initialize(&self) -> usize {
        let results = join_all(
            self.layers
                .iter()
                .map(|layer| self.guarded(layer.as_ref(), "initialize", layer.initialize())),
        )
        .await;
        results.into_iter().filter(Option::is_some).count()
    }

    /// Flush every layer.
    pub async fn flush(&self) {
        join_all(
            self.layers
                .iter()
                .map(|layer| self.guarded(layer.as_ref(), "flush", layer.flush())),
        )
        .await;
    }

    /// Exact match for `signature`, from the first layer that knows it.
    pub async fn lookup(&self, signature: &ErrorSignature) -> Option<KnowledgeEntry> {
        for layer in &self.layers {
            if let Some(Some(entry)) = self.guarded(layer.as_ref(), "lookup", layer.lookup(signature)).await {
                debug!(backend = layer.name(), signature = %signature, "knowledge hit");
                return Some(entry);
            }
        }
        None
    }

    /// Best entry with the same category and error class whose token
    /// similarity reaches `threshold`. Ties go to the higher success count.
    pub async fn lookup_similar(&self, signature: &ErrorSignature, threshold: f64) -> Option<KnowledgeEntry> {
        for layer in &self.layers {
            let Some(candidates) = self
                .guarded(layer.as_ref(), "candidates", layer.candidates(signature))
                .await
            else {
                continue;
            };

            let best = candidates
                .into_iter()
                .map(|entry| (signature.similarity(&entry.parsed), entry))
                .filter(|(score, _)| *score >= threshold)
                .max_by(|(sa, ea), (sb, eb)| {
                    sa.total_cmp(sb).then_with(|| ea.success_count.cmp(&eb.success_count))
                });

            if let Some((score, entry)) = best {
                debug!(
                    backend = layer.name(),
                    signature = %signature,
                    matched = %entry.signature,
                    score,
                    "similar knowledge hit"
                );
                return Some(entry);
            }
        }
        None
    }

    /// Record a fix for `signature` in every layer.
    pub async fn record(&self, signature: &ErrorSignature, fix: &Fix) {
        let entry = KnowledgeEntry::new(signature, fix);
        self.record_entry(&entry).await;
    }

    /// Upsert a prepared entry in every layer.
    pub async fn record_entry(&self, entry: &KnowledgeEntry) {
        join_all(
            self.layers
                .iter()
                .map(|layer| self.guarded(layer.as_ref(), "record", layer.record(entry))),
        )
        .await;
    }

    /// Count a success of `code` for a task of `kind` described by `description`.
    pub async fn record_success_pattern(&self, kind: TaskKind, description: &str, code: &str) {
        let digest = SuccessPattern::digest(description);
        join_all(self.layers.iter().map(|layer| {
            self.guarded(
                layer.as_ref(),
                "record_success_pattern",
                layer.record_success_pattern(kind, &digest, code),
            )
        }))
        .await;
    }

    /// Best example for a task: code that succeeded for the same description
    /// first, otherwise the kind's most used pattern.
    pub async fn success_pattern(&self, kind: TaskKind, description: &str) -> Option<SuccessPattern> {
        let digest = SuccessPattern::digest(description);
        for layer in &self.layers {
            if let Some(Some(pattern)) = self
                .guarded(layer.as_ref(), "success_pattern", layer.success_pattern(kind, &digest))
                .await
            {
                return Some(pattern);
            }
        }
        None
    }

    /// Recent entries from the first layer holding any.
    pub async fn recent_entries(&self, limit: usize) -> Vec<KnowledgeEntry> {
        for layer in &self.layers {
            if let Some(entries) = self
                .guarded(layer.as_ref(), "recent_entries", layer.recent_entries(limit))
                .await
            {
                if !entries.is_empty() {
                    return entries;
                }
            }
        }
        Vec::new()
    }

    pub async fn record_note(&self, note: &ReflectionNote) {
        join_all(
            self.layers
                .iter()
                .map(|layer| self.guarded(layer.as_ref(), "record_note", layer.record_note(note))),
        )
        .await;
    }

    /// The note on `topic` from the first layer holding one.
    pub async fn note_for(&self, topic: &str) -> Option<ReflectionNote> {
        for layer in &self.layers {
            if let Some(Some(note)) = self.guarded(layer.as_ref(), "note_for", layer.note_for(topic)).await {
                return Some(note);
            }
        }
        None
    }

    /// Recent notes from the first layer holding any.
    pub async fn recent_notes(&self, limit: usize) -> Vec<ReflectionNote> {
        for layer in &self.layers {
            if let Some(notes) = self
                .guarded(layer.as_ref(), "recent_notes", layer.recent_notes(limit))
                .await
            {
                if !notes.is_empty() {
                    return notes;
                }
            }
        }
        Vec::new()
    }
}
