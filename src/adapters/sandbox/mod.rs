//! Sandbox adapters.

pub mod dependencies;
pub mod process;
pub mod scripted;

pub use process::ProcessSandbox;
pub use scripted::{ExecutionRecord, ScriptedSandbox};
