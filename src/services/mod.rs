//! Application services: planning, scheduling, correction and reflection.

pub mod artifact_emitter;
pub mod code_validator;
pub mod dag_builder;
pub mod knowledge_store;
pub mod reflection_daemon;
pub mod scheduler;
pub mod self_correction;

pub use artifact_emitter::ArtifactEmitter;
pub use code_validator::{CodeValidator, SanitizeAction, SyntaxIssue, ValidationReport};
pub use dag_builder::DagBuilder;
pub use knowledge_store::KnowledgeStore;
pub use reflection_daemon::{
    DaemonHandle, DaemonStatus, ReflectionDaemon, ReflectionDaemonConfig, ReflectionEvent, ReflectionReport,
    StopReason,
};
pub use scheduler::{PlanState, RunSummary, Scheduler, SchedulerEvent, TaskReport, WorkerResult};
pub use self_correction::{CorrectionConfig, CorrectionLoop, CorrectionReport, CorrectionStatus};
