//! Short ID prefix resolution for CLI commands.
//!
//! Any unique prefix of a plan UUID is accepted, like git short hashes.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

const PLAN_QUERY: &str = "SELECT id FROM plans WHERE id LIKE ?";

fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        bail!("ID prefix must not be empty");
    }
    if !prefix.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        bail!("Invalid ID prefix '{prefix}': must contain only hex characters and dashes");
    }
    Ok(())
}

/// Resolve a plan ID prefix to a full UUID.
pub async fn resolve_plan_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(prefix) {
        return Ok(uuid);
    }
    validate_prefix(prefix)?;

    let rows: Vec<(String,)> = sqlx::query_as(PLAN_QUERY)
        .bind(format!("{}%", prefix.to_lowercase()))
        .fetch_all(pool)
        .await?;

    match rows.len() {
        0 => bail!("No plan found matching '{prefix}'"),
        1 => Ok(Uuid::parse_str(&rows[0].0)?),
        n => {
            let mut msg = format!("Ambiguous prefix '{prefix}': matches {n} plans:");
            for row in &rows {
                msg.push_str(&format!("\n  {}", row.0));
            }
            bail!("{msg}")
        }
    }
}
