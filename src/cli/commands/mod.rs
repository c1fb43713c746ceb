//! CLI command handlers.

pub mod knowledge;
pub mod resume;
pub mod run;
pub mod status;
