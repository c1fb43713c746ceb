//! Forgeloop - self-correcting task orchestrator
//!
//! Forgeloop runs a goal that has already been decomposed into a dependency
//! graph of tasks. Each task's code is generated, sanitized and executed in a
//! sandbox; failures are diagnosed against a knowledge store of earlier fixes
//! and the code is regenerated until it succeeds or its attempt budget runs
//! out. Fixes that work are recorded so later tasks can reuse them.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and the port traits
//! - **Adapters** (`adapters`): SQLite persistence, knowledge layers,
//!   sandboxes and code generators
//! - **Service Layer** (`services`): graph building, scheduling, the
//!   self-correction loop, artifacts and reflection
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use forgeloop::services::Scheduler;
//!
//! let summary = scheduler.execute("summarise sales", &tasks, cancel).await?;
//! println!("{}", summary.status);
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Config, ErrorSignature, ExecutionOutcome, FailureCategory, Plan, PlanStatus, Task, TaskDescriptor, TaskKind,
    TaskStatus,
};
pub use domain::ports::{CodeGenerator, FixSuggester, KnowledgeBackend, PlanRepository, Sandbox};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{CorrectionLoop, KnowledgeStore, RunSummary, Scheduler};
