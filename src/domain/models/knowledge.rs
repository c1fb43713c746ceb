//! Knowledge domain models: learned fixes, success patterns and reflection notes.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::outcome::ErrorSignature;
use super::task::TaskKind;

/// A fix that repaired a failure, keyed by the failure's signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Canonical signature key (unique)
    pub signature: String,
    /// Parsed form of `signature`
    pub parsed: ErrorSignature,
    /// What changed between the failing and the accepted code
    pub fix_description: String,
    /// Accepted code
    pub fix_code: String,
    pub success_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    pub fn new(signature: &ErrorSignature, fix: &Fix) -> Self {
        let now = Utc::now();
        Self {
            signature: signature.key(),
            parsed: signature.clone(),
            fix_description: fix.description.clone(),
            fix_code: fix.code.clone(),
            success_count: 1,
            created_at: now,
            last_used_at: now,
        }
    }

    /// Merge another record for the same signature into this one.
    ///
    /// Counters are summed; the most recent fix text wins.
    pub fn merge(&mut self, other: &Self) {
        self.success_count += other.success_count;
        if other.last_used_at >= self.last_used_at {
            self.fix_description.clone_from(&other.fix_description);
            self.fix_code.clone_from(&other.fix_code);
            self.last_used_at = other.last_used_at;
        }
        self.created_at = self.created_at.min(other.created_at);
    }

    pub fn fix(&self) -> Fix {
        Fix {
            description: self.fix_description.clone(),
            code: self.fix_code.clone(),
        }
    }
}

/// A fix as handed to and returned from the knowledge store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fix {
    pub description: String,
    pub code: String,
}

impl Fix {
    pub fn new(description: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            code: code.into(),
        }
    }
}

/// Words too common in task descriptions to tell two tasks apart.
const DIGEST_STOPWORDS: &[&str] = &[
    "and", "the", "for", "from", "into", "with", "that", "this", "then", "each", "all", "its", "are", "use", "using",
];

/// Code that made a task of a given kind succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessPattern {
    pub kind: TaskKind,
    /// Digest of the description of the task the code was written for
    #[serde(default)]
    pub description_digest: String,
    pub code: String,
    pub success_count: u64,
    pub last_used_at: DateTime<Utc>,
}

impl SuccessPattern {
    /// Digest of a task description.
    ///
    /// Descriptions are reduced to their set of lowercase words of three or
    /// more characters, minus stopwords, so that reordering or repunctuating
    /// a description keeps its digest. The set is hashed with 64-bit FNV-1a.
    pub fn digest(description: &str) -> String {
        let lowered = description.to_lowercase();
        let words: BTreeSet<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() >= 3 && !DIGEST_STOPWORDS.contains(w))
            .collect();

        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for word in words {
            for byte in word.bytes().chain(std::iter::once(b' ')) {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
        }
        format!("{hash:016x}")
    }
}

/// Advisory note written by the reflection daemon for future plans.
///
/// There is one note per topic; recording a note on a known topic replaces
/// the text and evidence but keeps the original id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionNote {
    pub id: Uuid,
    /// Signature key or task kind the note is about
    pub topic: String,
    pub note: String,
    /// Number of outcomes supporting the note
    pub evidence: u64,
    pub created_at: DateTime<Utc>,
}

impl ReflectionNote {
    pub fn new(topic: impl Into<String>, note: impl Into<String>, evidence: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            note: note.into(),
            evidence,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::FailureCategory;

    #[test]
    fn test_merge_sums_counters() {
        let sig = ErrorSignature::new(FailureCategory::RuntimeError, "E_IMPORT", vec![]);
        let mut a = KnowledgeEntry::new(&sig, &Fix::new("old", "a"));
        let mut b = KnowledgeEntry::new(&sig, &Fix::new("new", "b"));
        b.success_count = 4;
        b.last_used_at = a.last_used_at + chrono::Duration::seconds(1);

        a.merge(&b);
        assert_eq!(a.success_count, 5);
        assert_eq!(a.fix_description, "new");
    }

    #[test]
    fn test_merge_keeps_newer_fix() {
        let sig = ErrorSignature::new(FailureCategory::RuntimeError, "E", vec![]);
        let mut newer = KnowledgeEntry::new(&sig, &Fix::new("newer", "x"));
        let mut older = KnowledgeEntry::new(&sig, &Fix::new("older", "y"));
        older.last_used_at = newer.last_used_at - chrono::Duration::seconds(10);

        newer.merge(&older);
        assert_eq!(newer.success_count, 2);
        assert_eq!(newer.fix_description, "newer");
    }

    #[test]
    fn test_digest_ignores_order_case_and_stopwords() {
        let a = SuccessPattern::digest("Fetch prices from the API, then plot them");
        let b = SuccessPattern::digest("plot them; fetch PRICES api");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, SuccessPattern::digest("Fetch volumes from the API, then plot them"));
    }
}
