//! Code generator adapters.

pub mod command;
pub mod scripted;

pub use command::{CommandCodeGenerator, UnconfiguredGenerator};
pub use scripted::ScriptedCodeGenerator;
