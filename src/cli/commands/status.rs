//! `forgeloop status`: show a plan and its tasks.

use anyhow::{anyhow, Result};
use clap::Args;
use serde::Serialize;

use crate::adapters::sqlite::{initialize_database, SqlitePlanRepository};
use crate::cli::id_resolver::resolve_plan_id;
use crate::cli::output::table::TableFormatter;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, Plan, Task};
use crate::domain::ports::PlanRepository;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Plan ID or unique prefix
    pub plan_id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub plan: Plan,
    pub tasks: Vec<Task>,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Plan: {}", self.plan.id),
            format!("Goal: {}", self.plan.goal),
            format!("Status: {}", self.plan.status),
            format!("Updated: {}", self.plan.updated_at.format("%Y-%m-%d %H:%M:%S UTC")),
        ];
        if self.tasks.is_empty() {
            lines.push("No tasks.".to_string());
        } else {
            lines.push(TableFormatter::new().format_tasks(&self.tasks));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: StatusArgs, config: Config, json_mode: bool) -> Result<()> {
    let pool = initialize_database(&config.database).await?;
    let plan_id = resolve_plan_id(&pool, &args.plan_id).await?;
    let repository = SqlitePlanRepository::new(pool.clone());

    let plan = repository
        .load_plan(plan_id)
        .await?
        .ok_or_else(|| anyhow!("Plan not found: {plan_id}"))?;
    let tasks = repository.load_tasks(plan_id).await?;

    output(&StatusOutput { plan, tasks }, json_mode);
    pool.close().await;
    Ok(())
}
