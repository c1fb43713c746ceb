//! Table output formatting for CLI commands using comfy-table.

use std::env;

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};

use super::truncate;
use crate::domain::models::{KnowledgeEntry, ReflectionNote, Task, TaskStatus};

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self { use_colors, max_width }
    }

    /// Tasks of one plan, in declaration order.
    pub fn format_tasks(&self, tasks: &[Task]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Key", "Status", "Attempts", "Kind", "Blocked Reason"]));

        for task in tasks {
            let status_cell = if self.use_colors {
                Cell::new(task.status.as_str()).fg(status_color(task.status))
            } else {
                Cell::new(format!("{} {}", status_icon(task.status), task.status.as_str()))
            };

            table.add_row(vec![
                Cell::new(&task.key),
                status_cell,
                Cell::new(format!("{}/{}", task.attempt_count, task.max_attempts)),
                Cell::new(task.kind.as_str()),
                Cell::new(task.blocked_reason.as_deref().map_or_else(|| "-".to_string(), |r| truncate(r, 60))),
            ]);
        }

        table.to_string()
    }

    pub fn format_knowledge(&self, entries: &[KnowledgeEntry]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Signature", "Fix", "Uses", "Last Used"]));

        for entry in entries {
            table.add_row(vec![
                Cell::new(truncate(&entry.signature, 50)),
                Cell::new(truncate(&entry.fix_description, 50)),
                Cell::new(entry.success_count.to_string()),
                Cell::new(entry.last_used_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            ]);
        }

        table.to_string()
    }

    pub fn format_notes(&self, notes: &[ReflectionNote]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Topic", "Note", "Evidence", "Written"]));

        for note in notes {
            table.add_row(vec![
                Cell::new(truncate(&note.topic, 50)),
                Cell::new(truncate(&note.note, 70)),
                Cell::new(note.evidence.to_string()),
                Cell::new(note.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            ]);
        }

        table.to_string()
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if let Some(width) = self.max_width {
            table.set_width(width);
        }
        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
        .collect()
}

fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

const fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Succeeded => Color::Green,
        TaskStatus::Running => Color::Cyan,
        TaskStatus::Ready => Color::Yellow,
        TaskStatus::Failed => Color::Red,
        TaskStatus::Blocked => Color::Magenta,
        TaskStatus::Pending => Color::White,
    }
}

const fn status_icon(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Succeeded => "✓",
        TaskStatus::Running => "⟳",
        TaskStatus::Ready => "○",
        TaskStatus::Failed => "✗",
        TaskStatus::Blocked => "⊘",
        TaskStatus::Pending => "·",
    }
}
