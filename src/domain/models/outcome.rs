//! Execution outcomes and normalized error signatures.
//!
//! An [`ExecutionOutcome`] is created once per attempt and never mutated
//! afterwards. Failed outcomes carry an [`ErrorSignature`]: the failure
//! category plus the error class and the salient message tokens, with
//! volatile data (paths, numbers, addresses, timestamps) stripped so that two
//! occurrences of the same failure map to the same key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of message tokens kept in a signature.
const MAX_SIGNATURE_TOKENS: usize = 12;

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    Failure,
    Timeout,
    Cancelled,
}

impl ExitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "timeout" => Some(Self::Timeout),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Task-level failure taxonomy.
///
/// Each category has its own repair path: validation and generation failures
/// call for regeneration, dependency resolution failures for a different
/// dependency manifest, runtime failures for a logic fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    ValidationError,
    DependencyResolutionError,
    RuntimeError,
    TimeoutError,
    GenerationError,
    Cancelled,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::DependencyResolutionError => "dependency_resolution_error",
            Self::RuntimeError => "runtime_error",
            Self::TimeoutError => "timeout_error",
            Self::GenerationError => "generation_error",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "validation_error" => Some(Self::ValidationError),
            "dependency_resolution_error" => Some(Self::DependencyResolutionError),
            "runtime_error" => Some(Self::RuntimeError),
            "timeout_error" => Some(Self::TimeoutError),
            "generation_error" => Some(Self::GenerationError),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Error class used when the output names none.
    fn default_class(&self) -> &'static str {
        match self {
            Self::ValidationError => "SyntaxIssue",
            Self::DependencyResolutionError => "DependencyResolution",
            Self::RuntimeError => "NonZeroExit",
            Self::TimeoutError => "Timeout",
            Self::GenerationError => "GeneratorFailure",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized failure signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorSignature {
    pub category: FailureCategory,
    pub error_class: String,
    pub tokens: Vec<String>,
}

impl ErrorSignature {
    pub fn new(category: FailureCategory, error_class: impl Into<String>, tokens: Vec<String>) -> Self {
        Self {
            category,
            error_class: error_class.into(),
            tokens,
        }
    }

    /// Normalize raw failure output into a signature.
    ///
    /// The error class is taken from the last line shaped like
    /// `ClassName: message`; the message of that line supplies the tokens.
    pub fn normalize(category: FailureCategory, output: &str) -> Self {
        let last_error_line = output
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| split_error_line(line).is_some());

        let (error_class, message) = match last_error_line.and_then(split_error_line) {
            Some((class, message)) => (class.to_string(), message.to_string()),
            None => {
                let fallback = output.lines().rev().map(str::trim).find(|l| !l.is_empty());
                (
                    category.default_class().to_string(),
                    fallback.unwrap_or_default().to_string(),
                )
            }
        };

        Self {
            category,
            error_class,
            tokens: salient_tokens(&message),
        }
    }

    /// Canonical string key: `<category>:<error_class>:<tokens>`.
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.category.as_str(),
            self.error_class,
            self.tokens.join(" ")
        )
    }

    /// Parse a key produced by [`ErrorSignature::key`].
    pub fn parse_key(key: &str) -> Option<Self> {
        let mut parts = key.splitn(3, ':');
        let category = FailureCategory::from_str(parts.next()?)?;
        let error_class = parts.next()?.to_string();
        let tokens = parts
            .next()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        Some(Self {
            category,
            error_class,
            tokens,
        })
    }

    /// Jaccard similarity of the token sets, 0.0 when category or class differ.
    pub fn similarity(&self, other: &Self) -> f64 {
        if self.category != other.category || self.error_class != other.error_class {
            return 0.0;
        }
        let a: std::collections::HashSet<&str> = self.tokens.iter().map(String::as_str).collect();
        let b: std::collections::HashSet<&str> = other.tokens.iter().map(String::as_str).collect();
        let union = a.union(&b).count();
        if union == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let score = a.intersection(&b).count() as f64 / union as f64;
        score
    }
}

impl std::fmt::Display for ErrorSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Split `Class: message`, rejecting paths and prose.
fn split_error_line(line: &str) -> Option<(&str, &str)> {
    let (head, rest) = line.split_once(':')?;
    let head = head.trim();
    let looks_like_class = !head.is_empty()
        && head
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && head.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    let is_error_name = head.ends_with("Error")
        || head.ends_with("Exception")
        || head.ends_with("Interrupt")
        || head.ends_with("Exit")
        || (head.len() > 1 && head.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'));
    (looks_like_class && is_error_name).then_some((head, rest.trim()))
}

/// Lowercased message words with volatile data removed.
fn salient_tokens(message: &str) -> Vec<String> {
    message
        .split_whitespace()
        .map(|raw| {
            raw.trim_matches(|c: char| matches!(c, '\'' | '"' | '`' | ',' | '.' | ';' | '(' | ')' | '[' | ']' | '{' | '}' | ':'))
        })
        .filter(|word| !word.is_empty())
        .filter(|word| !word.contains('/') && !word.contains('\\'))
        .filter(|word| !word.chars().any(|c| c.is_ascii_digit()))
        .map(str::to_lowercase)
        .take(MAX_SIGNATURE_TOKENS)
        .collect()
}

/// Immutable record of a single attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub id: Uuid,
    pub task_id: Uuid,
    /// 1-based attempt number
    pub attempt: u32,
    pub exit_status: ExitStatus,
    /// Absent on success
    pub category: Option<FailureCategory>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub signature: Option<ErrorSignature>,
    pub artifact_paths: Vec<String>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl ExecutionOutcome {
    /// A successful attempt.
    pub fn success(task_id: Uuid, attempt: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            attempt,
            exit_status: ExitStatus::Success,
            category: None,
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            signature: None,
            artifact_paths: Vec::new(),
            duration_ms: 0,
            created_at: Utc::now(),
        }
    }

    /// A failed attempt; the signature is normalized from `stderr`.
    pub fn failure(task_id: Uuid, attempt: u32, category: FailureCategory, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        let exit_status = match category {
            FailureCategory::TimeoutError => ExitStatus::Timeout,
            FailureCategory::Cancelled => ExitStatus::Cancelled,
            _ => ExitStatus::Failure,
        };
        Self {
            id: Uuid::new_v4(),
            task_id,
            attempt,
            exit_status,
            category: Some(category),
            exit_code: None,
            stdout: String::new(),
            signature: Some(ErrorSignature::normalize(category, &stderr)),
            stderr,
            artifact_paths: Vec::new(),
            duration_ms: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_artifacts(mut self, paths: Vec<String>) -> Self {
        self.artifact_paths = paths;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.exit_status == ExitStatus::Success
    }
}
