//! Code generator backed by an external program.
//!
//! The program receives one JSON document on stdin and prints code (or, for
//! fix suggestions, a free-form hint) on stdout. The request carries a
//! `mode` field: `generate` or `suggest_fix`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::domain::errors::{GeneratorError, GeneratorResult};
use crate::domain::models::{ErrorSignature, GeneratorConfig};
use crate::domain::ports::{CodeGenerator, FixSuggester, GenerationRequest};

#[derive(Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum Envelope<'a> {
    Generate(&'a GenerationRequest),
    SuggestFix {
        signature: String,
        failing_code: &'a str,
    },
}

/// Spawns the configured generator program once per request.
#[derive(Debug, Clone)]
pub struct CommandCodeGenerator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCodeGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Build from configuration; `None` when no command is configured.
    pub fn from_config(config: &GeneratorConfig) -> Option<Self> {
        config.command.as_ref().map(|program| {
            Self::new(program.clone(), config.args.clone(), Duration::from_secs(config.timeout_secs))
        })
    }

    async fn invoke(&self, envelope: &Envelope<'_>) -> GeneratorResult<String> {
        let payload = serde_json::to_vec(envelope)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            // Dropping stdin closes the pipe so the program sees EOF.
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| GeneratorError::Timeout(self.timeout.as_secs()))??;

        if !output.status.success() {
            return Err(GeneratorError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(program = %self.program, bytes = stdout.len(), "generator responded");
        Ok(stdout)
    }
}

#[async_trait]
impl CodeGenerator for CommandCodeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> GeneratorResult<String> {
        let code = self.invoke(&Envelope::Generate(request)).await?;
        if code.trim().is_empty() {
            return Err(GeneratorError::EmptyOutput);
        }
        Ok(code)
    }
}

#[async_trait]
impl FixSuggester for CommandCodeGenerator {
    async fn suggest_fix(&self, signature: &ErrorSignature, failing_code: &str) -> GeneratorResult<Option<String>> {
        let hint = self
            .invoke(&Envelope::SuggestFix {
                signature: signature.key(),
                failing_code,
            })
            .await?;
        let hint = hint.trim();
        Ok((!hint.is_empty()).then(|| hint.to_string()))
    }
}

/// Generator used when none is configured: every request fails.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredGenerator;

#[async_trait]
impl CodeGenerator for UnconfiguredGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> GeneratorResult<String> {
        Err(GeneratorError::NotConfigured)
    }
}
