//! Domain layer for the forgeloop orchestrator
//!
//! Core models, errors and the port traits that adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{
    DomainError, DomainResult, GeneratorError, GeneratorResult, KnowledgeError, KnowledgeResult,
};
