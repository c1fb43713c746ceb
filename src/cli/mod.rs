//! Command-line interface for forgeloop.

pub mod commands;
pub mod id_resolver;
pub mod output;
pub mod plan_file;
pub mod runtime;
pub mod types;

pub use types::{Cli, Commands};

/// Print `err` and exit with status 1.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = serde_json::json!({ "error": format!("{err:#}") });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1)
}
