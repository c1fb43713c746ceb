//! Continuous reflection daemon.
//!
//! Periodically reviews recent execution outcomes and writes
//! [`ReflectionNote`]s about recurring failure signatures:
//! - how often a signature showed up and across how many tasks
//! - how many of those tasks recovered
//! - whether a known fix exists and how often it was reused
//!
//! Notes are kept one per signature, so each run refreshes the note rather
//! than adding another. The correction loop hands the note for a failing
//! signature to the generator. The daemon only writes to the knowledge
//! store; it never touches plan or task state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ExecutionOutcome, FailureCategory, KnowledgeEntry, ReflectionConfig, ReflectionNote};
use crate::domain::ports::PlanRepository;
use crate::services::knowledge_store::KnowledgeStore;

/// Configuration for the reflection daemon.
#[derive(Debug, Clone)]
pub struct ReflectionDaemonConfig {
    /// Interval between reflection runs.
    pub interval: Duration,
    /// Whether to run once immediately on start.
    pub run_on_startup: bool,
    /// Maximum consecutive failures before stopping.
    pub max_consecutive_failures: u32,
    /// Number of recent outcomes examined per run.
    pub window: usize,
}

impl Default for ReflectionDaemonConfig {
    fn default() -> Self {
        Self::from(&ReflectionConfig::default())
    }
}

impl From<&ReflectionConfig> for ReflectionDaemonConfig {
    fn from(config: &ReflectionConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs.max(1)),
            run_on_startup: config.run_on_startup,
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            window: config.window.max(1),
        }
    }
}

/// What one reflection run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReflectionReport {
    pub outcomes_examined: usize,
    pub signatures: usize,
    pub notes_written: usize,
}

/// Event emitted by the reflection daemon.
#[derive(Debug, Clone)]
pub enum ReflectionEvent {
    Started,
    RunStarted { run_number: u64 },
    RunCompleted {
        run_number: u64,
        report: ReflectionReport,
        duration_ms: u64,
    },
    RunFailed { run_number: u64, error: String },
    Stopped { reason: StopReason },
}

/// Reason the daemon stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Cancelled through the handle or the parent token.
    Requested,
    /// Too many consecutive failures.
    TooManyFailures,
}

/// Status of the reflection daemon.
#[derive(Debug, Clone, Default)]
pub struct DaemonStatus {
    pub running: bool,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_run: Option<Instant>,
    pub total_notes: u64,
}

/// Handle to control a running daemon.
#[derive(Clone)]
pub struct DaemonHandle {
    cancel: CancellationToken,
    status: Arc<RwLock<DaemonStatus>>,
}

impl DaemonHandle {
    /// Request the daemon to stop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn status(&self) -> DaemonStatus {
        self.status.read().await.clone()
    }
}

const EVENT_BUFFER: usize = 100;

fn emit(tx: &mpsc::Sender<ReflectionEvent>, event: ReflectionEvent) {
    if let Err(mpsc::error::TrySendError::Full(event)) = tx.try_send(event) {
        debug!(?event, "reflection event dropped, receiver is behind");
    }
}

#[derive(Default)]
struct SignatureStats {
    occurrences: u64,
    tasks: HashSet<Uuid>,
}

/// Background reflection over the outcome history.
pub struct ReflectionDaemon {
    repository: Arc<dyn PlanRepository>,
    knowledge: KnowledgeStore,
    config: ReflectionDaemonConfig,
    status: Arc<RwLock<DaemonStatus>>,
    cancel: CancellationToken,
}

impl ReflectionDaemon {
    /// `cancel` is typically a child of the process-wide shutdown token.
    pub fn new(
        repository: Arc<dyn PlanRepository>,
        knowledge: KnowledgeStore,
        config: ReflectionDaemonConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            repository,
            knowledge,
            config,
            status: Arc::new(RwLock::new(DaemonStatus::default())),
            cancel,
        }
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            cancel: self.cancel.clone(),
            status: self.status.clone(),
        }
    }

    pub fn config(&self) -> &ReflectionDaemonConfig {
        &self.config
    }

    /// Spawn the daemon loop, returning a channel for events.
    ///
    /// Events are dropped while the channel is full; a slow or absent reader
    /// never holds up reflection runs.
    pub fn run(self) -> mpsc::Receiver<ReflectionEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            self.run_loop(tx).await;
        });
        rx
    }

    async fn run_loop(self, tx: mpsc::Sender<ReflectionEvent>) {
        self.status.write().await.running = true;
        emit(&tx, ReflectionEvent::Started);
        info!(interval_secs = self.config.interval.as_secs(), "reflection daemon started");

        let mut consecutive_failures = 0u32;
        let mut ticker = interval_at(Instant::now() + self.config.interval, self.config.interval);

        let reason = 'outer: {
            if self.config.run_on_startup {
                self.run_cycle(&tx, &mut consecutive_failures).await;
                if consecutive_failures >= self.config.max_consecutive_failures {
                    break 'outer StopReason::TooManyFailures;
                }
            }

            loop {
                tokio::select! {
                    () = self.cancel.cancelled() => break 'outer StopReason::Requested,
                    _ = ticker.tick() => {
                        self.run_cycle(&tx, &mut consecutive_failures).await;
                        if consecutive_failures >= self.config.max_consecutive_failures {
                            break 'outer StopReason::TooManyFailures;
                        }
                    }
                }
            }
        };

        self.status.write().await.running = false;
        match reason {
            StopReason::TooManyFailures => {
                warn!(failures = consecutive_failures, "reflection daemon stopping after repeated failures");
            }
            StopReason::Requested => info!("reflection daemon stopped"),
        }
        emit(&tx, ReflectionEvent::Stopped { reason });
    }

    async fn run_cycle(&self, tx: &mpsc::Sender<ReflectionEvent>, consecutive_failures: &mut u32) {
        let run_number = {
            let mut status = self.status.write().await;
            status.total_runs += 1;
            status.total_runs
        };
        emit(tx, ReflectionEvent::RunStarted { run_number });

        let start = Instant::now();
        let result = self.run_once().await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(report) => {
                *consecutive_failures = 0;
                {
                    let mut status = self.status.write().await;
                    status.successful_runs += 1;
                    status.last_run = Some(Instant::now());
                    status.total_notes += report.notes_written as u64;
                }
                debug!(run_number, notes = report.notes_written, duration_ms, "reflection run completed");
                emit(
                    tx,
                    ReflectionEvent::RunCompleted {
                        run_number,
                        report,
                        duration_ms,
                    },
                );
            }
            Err(e) => {
                *consecutive_failures += 1;
                self.status.write().await.failed_runs += 1;
                warn!(run_number, error = %e, "reflection run failed");
                emit(
                    tx,
                    ReflectionEvent::RunFailed {
                        run_number,
                        error: e.to_string(),
                    },
                );
            }
        }
    }

    /// Reflect once over the most recent outcomes.
    pub async fn run_once(&self) -> DomainResult<ReflectionReport> {
        let outcomes = self.repository.recent_outcomes(self.config.window).await?;
        let entries: HashMap<String, KnowledgeEntry> = self
            .knowledge
            .recent_entries(self.config.window)
            .await
            .into_iter()
            .map(|e| (e.signature.clone(), e))
            .collect();

        let recovered: HashSet<Uuid> = outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| o.task_id)
            .collect();
        let stats = group_failures(&outcomes);

        let mut ranked: Vec<(&String, &SignatureStats)> = stats.iter().collect();
        ranked.sort_by(|a, b| b.1.occurrences.cmp(&a.1.occurrences).then_with(|| a.0.cmp(b.0)));

        for (key, stats) in &ranked {
            let recovered_tasks = stats.tasks.iter().filter(|t| recovered.contains(t)).count();
            let note = ReflectionNote::new(
                (*key).clone(),
                describe(key, stats, recovered_tasks, entries.get(*key)),
                stats.occurrences,
            );
            self.knowledge.record_note(&note).await;
        }

        Ok(ReflectionReport {
            outcomes_examined: outcomes.len(),
            signatures: ranked.len(),
            notes_written: ranked.len(),
        })
    }
}

/// Failure outcomes grouped by signature key. Cancellations are not failures
/// of the code and are left out.
fn group_failures(outcomes: &[ExecutionOutcome]) -> BTreeMap<String, SignatureStats> {
    let mut stats: BTreeMap<String, SignatureStats> = BTreeMap::new();
    for outcome in outcomes {
        if outcome.category == Some(FailureCategory::Cancelled) {
            continue;
        }
        if let Some(signature) = &outcome.signature {
            let entry = stats.entry(signature.key()).or_default();
            entry.occurrences += 1;
            entry.tasks.insert(outcome.task_id);
        }
    }
    stats
}

fn describe(key: &str, stats: &SignatureStats, recovered: usize, entry: Option<&KnowledgeEntry>) -> String {
    let mut note = format!(
        "{key} seen {} time(s) across {} task(s), {recovered} recovered",
        stats.occurrences,
        stats.tasks.len()
    );
    match entry {
        Some(entry) => note.push_str(&format!(
            "; fix reused {} time(s): {}",
            entry.success_count, entry.fix_description
        )),
        None => note.push_str("; no recorded fix"),
    }
    note
}
