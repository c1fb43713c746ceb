pub mod artifact;
pub mod config;
pub mod dag;
pub mod knowledge;
pub mod outcome;
pub mod plan;
pub mod task;

pub use artifact::{ArtifactRecord, LifecyclePoint};
pub use config::{
    ArtifactsConfig, Config, DatabaseConfig, GeneratorConfig, KnowledgeConfig, LoggingConfig,
    ReflectionConfig, SandboxConfig, SchedulerConfig,
};
pub use dag::{DagEdge, TaskDag};
pub use knowledge::{Fix, KnowledgeEntry, ReflectionNote, SuccessPattern};
pub use outcome::{ErrorSignature, ExecutionOutcome, ExitStatus, FailureCategory};
pub use plan::{resolve_plan_status, Plan, PlanStatus};
pub use task::{Task, TaskDescriptor, TaskKind, TaskStatus};
