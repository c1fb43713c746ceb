//! `forgeloop knowledge`: inspect learned fixes and reflection notes.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::output::table::TableFormatter;
use crate::cli::output::{output, CommandOutput};
use crate::cli::runtime::Runtime;
use crate::domain::models::{Config, KnowledgeEntry, ReflectionNote};

#[derive(Args, Debug)]
pub struct KnowledgeArgs {
    #[command(subcommand)]
    pub command: KnowledgeCommands,
}

#[derive(Subcommand, Debug)]
pub enum KnowledgeCommands {
    /// List recently used knowledge entries
    List {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show reflection notes, newest first
    Notes {
        /// Only the note on this signature key
        #[arg(long)]
        topic: Option<String>,
        /// Maximum number of notes to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Debug, Serialize)]
pub struct KnowledgeListOutput {
    pub entries: Vec<KnowledgeEntry>,
    pub total: usize,
}

impl CommandOutput for KnowledgeListOutput {
    fn to_human(&self) -> String {
        if self.entries.is_empty() {
            return "No knowledge entries found.".to_string();
        }
        format!(
            "{}\nShowing {} entr{}",
            TableFormatter::new().format_knowledge(&self.entries),
            self.total,
            if self.total == 1 { "y" } else { "ies" }
        )
    }
}

#[derive(Debug, Serialize)]
pub struct NotesOutput {
    pub notes: Vec<ReflectionNote>,
    pub total: usize,
}

impl CommandOutput for NotesOutput {
    fn to_human(&self) -> String {
        if self.notes.is_empty() {
            return "No reflection notes found.".to_string();
        }
        format!(
            "{}\nShowing {} note{}",
            TableFormatter::new().format_notes(&self.notes),
            self.total,
            if self.total == 1 { "" } else { "s" }
        )
    }
}

pub async fn execute(args: KnowledgeArgs, config: Config, json_mode: bool) -> Result<()> {
    let runtime = Runtime::open(config).await?;

    match args.command {
        KnowledgeCommands::List { limit } => {
            let entries = runtime.knowledge.recent_entries(limit).await;
            output(
                &KnowledgeListOutput {
                    total: entries.len(),
                    entries,
                },
                json_mode,
            );
        }
        KnowledgeCommands::Notes { topic, limit } => {
            let notes: Vec<ReflectionNote> = match topic {
                Some(topic) => runtime.knowledge.note_for(&topic).await.into_iter().collect(),
                None => runtime.knowledge.recent_notes(limit).await,
            };
            output(
                &NotesOutput {
                    total: notes.len(),
                    notes,
                },
                json_mode,
            );
        }
    }

    runtime.shutdown().await;
    Ok(())
}
