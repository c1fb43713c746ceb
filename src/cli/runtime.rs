//! Wiring shared by the CLI commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::generators::{CommandCodeGenerator, UnconfiguredGenerator};
use crate::adapters::knowledge::InMemoryKnowledgeBackend;
use crate::adapters::sandbox::ProcessSandbox;
use crate::adapters::sqlite::{initialize_database, SqliteKnowledgeBackend, SqlitePlanRepository};
use crate::domain::models::Config;
use crate::domain::ports::{CodeGenerator, KnowledgeBackend, NullKnowledgeBackend};
use crate::services::{
    ArtifactEmitter, CorrectionConfig, CorrectionLoop, KnowledgeStore, ReflectionDaemon, ReflectionDaemonConfig,
    Scheduler,
};

/// Opened database, knowledge chain and artifact root for one invocation.
pub struct Runtime {
    pub config: Config,
    pub pool: SqlitePool,
    pub repository: Arc<SqlitePlanRepository>,
    pub knowledge: KnowledgeStore,
    pub emitter: ArtifactEmitter,
}

impl Runtime {
    pub async fn open(config: Config) -> Result<Self> {
        let pool = initialize_database(&config.database)
            .await
            .with_context(|| format!("Failed to open database at {}", config.database.path))?;
        let repository = Arc::new(SqlitePlanRepository::new(pool.clone()));

        let mut memory = InMemoryKnowledgeBackend::new(config.knowledge.memory_capacity);
        if let Some(path) = &config.knowledge.snapshot_path {
            memory = memory.with_snapshot(path);
        }
        let layers: Vec<Arc<dyn KnowledgeBackend>> = vec![
            Arc::new(SqliteKnowledgeBackend::new(pool.clone())),
            Arc::new(memory),
            Arc::new(NullKnowledgeBackend),
        ];
        let knowledge = KnowledgeStore::new(layers, Duration::from_millis(config.knowledge.layer_timeout_ms));
        let healthy = knowledge.initialize().await;
        info!(layers = ?knowledge.layer_names(), healthy, "knowledge store ready");

        let emitter = ArtifactEmitter::new(&config.artifacts.dir);

        Ok(Self {
            config,
            pool,
            repository,
            knowledge,
            emitter,
        })
    }

    /// Self-correction loop backed by the configured generator and a process
    /// sandbox.
    pub fn correction_loop(&self) -> Arc<CorrectionLoop> {
        let correction_config = CorrectionConfig {
            workspace_dir: PathBuf::from(&self.config.sandbox.workspace_dir),
            sandbox_timeout: Duration::from_secs(self.config.sandbox.timeout_secs),
            generator_timeout: Duration::from_secs(self.config.generator.timeout_secs),
            similarity_threshold: self.config.knowledge.similarity_threshold,
            ..CorrectionConfig::default()
        };
        let sandbox = Arc::new(ProcessSandbox::new(self.config.sandbox.clone()));

        let correction = match CommandCodeGenerator::from_config(&self.config.generator) {
            Some(command) => {
                let command = Arc::new(command);
                CorrectionLoop::new(
                    command.clone() as Arc<dyn CodeGenerator>,
                    sandbox,
                    self.knowledge.clone(),
                    self.repository.clone(),
                    correction_config,
                )
                .with_suggester(command)
            }
            None => {
                warn!("no generator command configured; only tasks with inline code can run");
                CorrectionLoop::new(
                    Arc::new(UnconfiguredGenerator),
                    sandbox,
                    self.knowledge.clone(),
                    self.repository.clone(),
                    correction_config,
                )
            }
        };
        Arc::new(correction.with_emitter(self.emitter.clone()))
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.repository.clone(),
            self.correction_loop(),
            self.emitter.clone(),
            self.config.scheduler.clone(),
        )
    }

    /// Reflection daemon, or `None` when disabled.
    pub fn reflection_daemon(&self, cancel: CancellationToken) -> Option<ReflectionDaemon> {
        self.config.reflection.enabled.then(|| {
            ReflectionDaemon::new(
                self.repository.clone(),
                self.knowledge.clone(),
                ReflectionDaemonConfig::from(&self.config.reflection),
                cancel,
            )
        })
    }

    /// Flush knowledge layers and close the pool.
    pub async fn shutdown(self) {
        self.knowledge.flush().await;
        self.pool.close().await;
    }
}

/// Cancel `token` on the first Ctrl-C.
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling plan");
            token.cancel();
        }
    });
}
