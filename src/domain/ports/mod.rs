//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that infrastructure adapters must implement:
//! - PlanRepository: persistence of plans, tasks and execution outcomes
//! - KnowledgeBackend: one layer of the knowledge store fallback chain
//! - CodeGenerator / FixSuggester: external code generation collaborators
//! - Sandbox: isolated execution of a single task attempt
//!
//! These traits define the contracts that allow the domain to be independent
//! of specific infrastructure implementations.

pub mod code_generator;
pub mod knowledge_backend;
pub mod null_knowledge;
pub mod plan_repository;
pub mod sandbox;

pub use code_generator::{AttemptContext, CodeGenerator, FixSuggester, GenerationRequest};
pub use knowledge_backend::KnowledgeBackend;
pub use null_knowledge::NullKnowledgeBackend;
pub use plan_repository::PlanRepository;
pub use sandbox::{Sandbox, SandboxRequest};
