//! Knowledge store backend layers that don't need a database.

pub mod in_memory;

pub use in_memory::InMemoryKnowledgeBackend;
