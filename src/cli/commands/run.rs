//! `forgeloop run`: submit a plan file and drive it to completion.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::output::{output, CommandOutput};
use crate::cli::plan_file::PlanFile;
use crate::cli::runtime::{cancel_on_ctrl_c, Runtime};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;
use crate::services::{ReflectionEvent, RunSummary};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Plan file (YAML with `goal` and `tasks`)
    pub plan: PathBuf,

    /// Override scheduler.max_concurrency
    #[arg(long)]
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub plan_id: String,
    pub status: String,
    pub succeeded: usize,
    pub blocked: usize,
    pub unfinished: usize,
    pub cancelled: bool,
    pub report: String,
}

impl RunOutput {
    pub fn new(summary: &RunSummary, runtime: &Runtime) -> Self {
        Self {
            plan_id: summary.plan_id.to_string(),
            status: summary.status.as_str().to_string(),
            succeeded: summary.succeeded,
            blocked: summary.blocked,
            unfinished: summary.unfinished,
            cancelled: summary.cancelled,
            report: runtime.emitter.report_path(summary.plan_id).display().to_string(),
        }
    }
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Plan {}: {}", self.plan_id, self.status),
            format!(
                "  succeeded: {}  blocked: {}  unfinished: {}",
                self.succeeded, self.blocked, self.unfinished
            ),
            format!("  report: {}", self.report),
        ];
        if self.cancelled {
            lines.push(format!("Cancelled. Continue with: forgeloop resume {}", self.plan_id));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: RunArgs, mut config: Config, json_mode: bool) -> Result<()> {
    if let Some(max_concurrency) = args.max_concurrency {
        config.scheduler.max_concurrency = max_concurrency;
        ConfigLoader::validate(&config)?;
    }
    let plan = PlanFile::load(&args.plan)?;

    let runtime = Runtime::open(config).await?;
    let summary = drive(&runtime, |scheduler, cancel| async move {
        scheduler.execute(&plan.goal, &plan.tasks, cancel).await
    })
    .await
    .context("Plan run failed")?;

    output(&RunOutput::new(&summary, &runtime), json_mode);
    runtime.shutdown().await;
    Ok(())
}

async fn drain_reflection_events(mut events: tokio::sync::mpsc::Receiver<ReflectionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ReflectionEvent::RunCompleted { run_number, report, .. } => {
                debug!(run_number, notes = report.notes_written, "reflection run completed");
            }
            ReflectionEvent::Stopped { reason } => debug!(?reason, "reflection daemon finished"),
            _ => {}
        }
    }
}

/// Run `job` with Ctrl-C cancellation and the reflection daemon alongside.
pub(crate) async fn drive<F, Fut>(runtime: &Runtime, job: F) -> Result<RunSummary>
where
    F: FnOnce(crate::services::Scheduler, CancellationToken) -> Fut,
    Fut: std::future::Future<Output = crate::domain::errors::DomainResult<RunSummary>>,
{
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let reflection_cancel = cancel.child_token();
    let reflection = runtime
        .reflection_daemon(reflection_cancel.clone())
        .map(|daemon| tokio::spawn(drain_reflection_events(daemon.run())));

    let result = job(runtime.scheduler(), cancel).await;

    reflection_cancel.cancel();
    if let Some(drain) = reflection {
        let _ = drain.await;
    }

    let summary = result?;
    info!(plan_id = %summary.plan_id, status = %summary.status, "run finished");
    Ok(summary)
}
