//! Infrastructure adapters for external systems.

pub mod generators;
pub mod knowledge;
pub mod sandbox;
pub mod sqlite;
