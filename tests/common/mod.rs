//! Common test utilities for integration tests
//!
//! Builds schedulers over an in-memory database, a scripted generator and a
//! scripted sandbox, with artifacts and workspaces in a temporary directory.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tempfile::TempDir;

use forgeloop::adapters::generators::ScriptedCodeGenerator;
use forgeloop::adapters::knowledge::InMemoryKnowledgeBackend;
use forgeloop::adapters::sandbox::ScriptedSandbox;
use forgeloop::adapters::sqlite::{create_migrated_test_pool, SqliteKnowledgeBackend, SqlitePlanRepository};
use forgeloop::domain::models::SchedulerConfig;
use forgeloop::domain::ports::{KnowledgeBackend, Sandbox};
use forgeloop::services::{ArtifactEmitter, CorrectionConfig, CorrectionLoop, KnowledgeStore, Scheduler};

/// Everything a scenario needs, sharing one database and one artifact root.
pub struct TestEnv {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub repository: Arc<SqlitePlanRepository>,
    pub sqlite_knowledge: Arc<SqliteKnowledgeBackend>,
    pub memory_knowledge: Arc<InMemoryKnowledgeBackend>,
    pub knowledge: KnowledgeStore,
    pub emitter: ArtifactEmitter,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let pool = create_migrated_test_pool().await.expect("Failed to create test pool");
        let repository = Arc::new(SqlitePlanRepository::new(pool.clone()));
        let sqlite_knowledge = Arc::new(SqliteKnowledgeBackend::new(pool.clone()));
        let memory_knowledge = Arc::new(InMemoryKnowledgeBackend::new(64));
        let knowledge = KnowledgeStore::new(
            vec![
                sqlite_knowledge.clone() as Arc<dyn KnowledgeBackend>,
                memory_knowledge.clone() as Arc<dyn KnowledgeBackend>,
            ],
            Duration::from_secs(1),
        );
        let emitter = ArtifactEmitter::new(dir.path().join("artifacts"));

        Self {
            dir,
            pool,
            repository,
            sqlite_knowledge,
            memory_knowledge,
            knowledge,
            emitter,
        }
    }

    pub fn correction_loop(&self, generator: Arc<ScriptedCodeGenerator>, sandbox: Arc<dyn Sandbox>) -> Arc<CorrectionLoop> {
        Arc::new(
            CorrectionLoop::new(
                generator,
                sandbox,
                self.knowledge.clone(),
                self.repository.clone(),
                CorrectionConfig {
                    workspace_dir: self.dir.path().join("workspace"),
                    ..CorrectionConfig::default()
                },
            )
            .with_emitter(self.emitter.clone()),
        )
    }

    pub fn scheduler(
        &self,
        generator: Arc<ScriptedCodeGenerator>,
        sandbox: Arc<dyn Sandbox>,
        max_concurrency: usize,
        default_max_attempts: u32,
    ) -> Scheduler {
        Scheduler::new(
            self.repository.clone(),
            self.correction_loop(generator, sandbox),
            self.emitter.clone(),
            SchedulerConfig {
                max_concurrency,
                default_max_attempts,
            },
        )
    }
}

/// Scripted sandbox honouring the `# fail:` / `# sleep:` / `# print:`
/// directives.
pub fn scripted_sandbox() -> Arc<ScriptedSandbox> {
    Arc::new(ScriptedSandbox::new())
}

/// Initialize tracing for tests that want log output.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
