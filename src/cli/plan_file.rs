//! YAML plan files accepted by `forgeloop run`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::models::TaskDescriptor;

/// A goal already decomposed into tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFile {
    pub goal: String,
    #[serde(default)]
    pub tasks: Vec<TaskDescriptor>,
}

impl PlanFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid plan file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let plan: Self = serde_yaml::from_str(raw)?;
        if plan.goal.trim().is_empty() {
            bail!("plan goal cannot be empty");
        }
        Ok(plan)
    }
}
