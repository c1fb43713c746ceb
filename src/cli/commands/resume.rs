//! `forgeloop resume`: continue a persisted plan.

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::commands::run::{drive, RunOutput};
use crate::cli::id_resolver::resolve_plan_id;
use crate::cli::output::output;
use crate::cli::runtime::Runtime;
use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Plan ID or unique prefix
    pub plan_id: String,
}

pub async fn execute(args: ResumeArgs, config: Config, json_mode: bool) -> Result<()> {
    let runtime = Runtime::open(config).await?;
    let plan_id = resolve_plan_id(&runtime.pool, &args.plan_id).await?;

    let summary = drive(&runtime, |scheduler, cancel| async move {
        scheduler.resume(plan_id, cancel).await
    })
    .await
    .with_context(|| format!("Failed to resume plan {plan_id}"))?;

    output(&RunOutput::new(&summary, &runtime), json_mode);
    runtime.shutdown().await;
    Ok(())
}
