//! Artifact Emitter Service
//!
//! Writes the plan's append-only artifacts under `<dir>/<plan_id>/`:
//!
//! - `artifacts.jsonl`: one JSON record per lifecycle point, keyed for
//!   idempotency
//! - `report.md`: the human-readable report, one section per record
//! - `code/<task_key>_<task_id>_attempt<N>.py`: generated code of every attempt
//!
//! Records are never rewritten. Emitting a key that is already in the ledger
//! is a no-op, so a resumed plan can safely re-emit. Report sections carry a
//! marker with their key, so a section written just before a crash is not
//! repeated when the record is emitted again.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ArtifactRecord, ExecutionOutcome, LifecyclePoint, Plan, Task, TaskStatus,
};

const LEDGER_FILE: &str = "artifacts.jsonl";
const REPORT_FILE: &str = "report.md";
const CODE_DIR: &str = "code";

/// Append-only artifact writer.
#[derive(Clone)]
pub struct ArtifactEmitter {
    root: PathBuf,
    /// Serializes check-then-append per plan
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ArtifactEmitter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn plan_dir(&self, plan_id: Uuid) -> PathBuf {
        self.root.join(plan_id.to_string())
    }

    pub fn report_path(&self, plan_id: Uuid) -> PathBuf {
        self.plan_dir(plan_id).join(REPORT_FILE)
    }

    fn lock_for(&self, plan_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(plan_id).or_default().clone()
    }

    /// Ledger records for a plan, in write order.
    pub async fn records(&self, plan_id: Uuid) -> DomainResult<Vec<ArtifactRecord>> {
        let path = self.plan_dir(plan_id).join(LEDGER_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut records = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }

    async fn emitted_keys(&self, plan_id: Uuid) -> DomainResult<HashSet<String>> {
        Ok(self
            .records(plan_id)
            .await?
            .into_iter()
            .map(|record| record.key)
            .collect())
    }

    /// Append `record` unless its key is already in the ledger. The payload
    /// is written first, and only for keys not yet recorded.
    async fn emit(&self, record: ArtifactRecord, payload: Payload<'_>) -> DomainResult<bool> {
        let lock = self.lock_for(record.plan_id);
        let _guard = lock.lock().await;

        if self.emitted_keys(record.plan_id).await?.contains(&record.key) {
            debug!(plan_id = %record.plan_id, key = %record.key, "artifact already emitted");
            return Ok(false);
        }

        let dir = self.plan_dir(record.plan_id);
        tokio::fs::create_dir_all(&dir).await?;

        match payload {
            Payload::Report(section) => {
                let report = dir.join(REPORT_FILE);
                let marker = section_marker(&record.key);
                if report_contains(&report, &marker).await? {
                    debug!(key = %record.key, "report section already written");
                } else {
                    append(&report, &format!("{marker}\n{section}")).await?;
                }
            }
            Payload::File { path, content } => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(path, content).await?;
            }
        }

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        append(&dir.join(LEDGER_FILE), &line).await?;

        info!(plan_id = %record.plan_id, key = %record.key, "artifact emitted");
        Ok(true)
    }

    /// Hook 1: the plan has been decomposed.
    pub async fn plan_overview(&self, plan: &Plan, tasks: &[Task]) -> DomainResult<bool> {
        let mut body = format!("# Plan {}\n\n**Goal:** {}\n\n## Tasks\n\n", plan.id, plan.goal);
        let keys: HashMap<Uuid, &str> = tasks.iter().map(|t| (t.id, t.key.as_str())).collect();
        for task in tasks {
            let deps: Vec<&str> = task
                .depends_on
                .iter()
                .filter_map(|id| keys.get(id).copied())
                .collect();
            let _ = write!(body, "- **{}** ({}): {}", task.key, task.kind.as_str(), task.description);
            if !deps.is_empty() {
                let _ = write!(body, " (after {})", deps.join(", "));
            }
            body.push('\n');
        }
        body.push('\n');

        let record = ArtifactRecord::new(plan.id, LifecyclePoint::Overview, body.clone());
        self.emit(record, Payload::Report(&body)).await
    }

    /// Hook 2: a task reached `succeeded` or `blocked`.
    pub async fn task_fragment(&self, plan: &Plan, task: &Task, history: &[ExecutionOutcome]) -> DomainResult<bool> {
        let mut body = format!(
            "## {} {}: {}\n\n_{}_ after {} attempt(s)\n",
            chrono::Utc::now().to_rfc3339(),
            task.key,
            task.status,
            task.description,
            task.attempt_count
        );
        if let Some(reason) = &task.blocked_reason {
            let _ = writeln!(body, "\nBlocked: {reason}");
        }
        if task.status == TaskStatus::Succeeded {
            if let Some(last) = history.last().filter(|o| o.is_success()) {
                if !last.stdout.trim().is_empty() {
                    let _ = write!(body, "\n```\n{}\n```\n", last.stdout.trim_end());
                }
                if !last.artifact_paths.is_empty() {
                    let _ = writeln!(body, "\nFiles: {}", last.artifact_paths.join(", "));
                }
            }
        } else {
            write_history(&mut body, history);
        }
        body.push('\n');

        let record = ArtifactRecord::new(plan.id, LifecyclePoint::TaskFragment { task_id: task.id }, body.clone());
        self.emit(record, Payload::Report(&body)).await
    }

    /// Hook 3: the plan reached `completed` or `failed`.
    pub async fn final_summary(
        &self,
        plan: &Plan,
        tasks: &[Task],
        histories: &HashMap<Uuid, Vec<ExecutionOutcome>>,
    ) -> DomainResult<bool> {
        let succeeded: Vec<&Task> = tasks.iter().filter(|t| t.status == TaskStatus::Succeeded).collect();
        let blocked: Vec<&Task> = tasks.iter().filter(|t| t.status == TaskStatus::Blocked).collect();

        let mut body = format!(
            "# Summary: {}\n\n{} succeeded, {} blocked\n\n",
            plan.status,
            succeeded.len(),
            blocked.len()
        );
        if !succeeded.is_empty() {
            body.push_str("## Succeeded\n\n");
            for task in &succeeded {
                let _ = writeln!(body, "- {} ({} attempt(s))", task.key, task.attempt_count);
            }
            body.push('\n');
        }
        if !blocked.is_empty() {
            body.push_str("## Blocked\n\n");
            for task in &blocked {
                let history = histories.get(&task.id).map_or(&[][..], Vec::as_slice);
                let category = history
                    .iter()
                    .rev()
                    .find_map(|o| o.category)
                    .map_or("dependency_blocked", |c| c.as_str());
                let _ = writeln!(body, "### {} ({category})\n", task.key);
                if let Some(reason) = &task.blocked_reason {
                    let _ = writeln!(body, "{reason}");
                }
                write_history(&mut body, history);
                body.push('\n');
            }
        }

        let record = ArtifactRecord::new(plan.id, LifecyclePoint::Summary, body.clone());
        self.emit(record, Payload::Report(&body)).await
    }

    /// Keep one attempt's generated code. Returns the file path.
    ///
    /// An attempt already in the ledger keeps its original file.
    pub async fn write_generated_file(
        &self,
        plan_id: Uuid,
        task: &Task,
        attempt: u32,
        code: &str,
    ) -> DomainResult<PathBuf> {
        let path = self.plan_dir(plan_id).join(CODE_DIR).join(format!(
            "{}_{}_attempt{attempt}.py",
            file_stem(&task.key),
            task.id.simple()
        ));

        let record = ArtifactRecord::new(
            plan_id,
            LifecyclePoint::GeneratedFile {
                task_id: task.id,
                attempt,
            },
            path.display().to_string(),
        );
        self.emit(
            record,
            Payload::File {
                path: &path,
                content: code,
            },
        )
        .await?;
        Ok(path)
    }
}

/// What goes to disk alongside a ledger record.
enum Payload<'a> {
    /// Section appended to `report.md`
    Report(&'a str),
    /// Standalone file
    File { path: &'a Path, content: &'a str },
}

fn section_marker(key: &str) -> String {
    format!("<!-- forgeloop:{key} -->")
}

async fn report_contains(path: &Path, marker: &str) -> std::io::Result<bool> {
    match tokio::fs::read_to_string(path).await {
        Ok(report) => Ok(report.lines().any(|line| line == marker)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// One `O_APPEND` write per call.
async fn append(path: &Path, content: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await
}

fn write_history(body: &mut String, history: &[ExecutionOutcome]) {
    for outcome in history {
        let _ = write!(body, "\n- attempt {}: {}", outcome.attempt, outcome.exit_status.as_str());
        if let Some(signature) = &outcome.signature {
            let _ = write!(body, " `{signature}`");
        }
    }
    if !history.is_empty() {
        body.push('\n');
    }
}

/// Task keys are free text; keep file names portable.
fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
