//! CLI type definitions
//!
//! Clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cli::commands::knowledge::KnowledgeArgs;
use crate::cli::commands::resume::ResumeArgs;
use crate::cli::commands::run::RunArgs;
use crate::cli::commands::status::StatusArgs;

#[derive(Parser, Debug)]
#[command(name = "forgeloop")]
#[command(about = "Forgeloop - self-correcting task orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Read configuration from this file instead of .forgeloop/
    #[arg(short, long, global = true, env = "FORGELOOP_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build, persist and run a plan file
    Run(RunArgs),
    /// Resume a persisted plan
    Resume(ResumeArgs),
    /// Show the tasks of a plan
    Status(StatusArgs),
    /// Inspect the knowledge store
    Knowledge(KnowledgeArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["forgeloop", "run", "plan.yaml", "--max-concurrency", "2", "--json"]);
        assert!(cli.json);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.plan, PathBuf::from("plan.yaml"));
                assert_eq!(args.max_concurrency, Some(2));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_knowledge_list() {
        let cli = Cli::parse_from(["forgeloop", "knowledge", "list", "--limit", "5"]);
        assert!(matches!(cli.command, Commands::Knowledge(_)));
    }
}
