//! Deterministic code generator for tests and dry runs.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::errors::GeneratorResult;
use crate::domain::models::ErrorSignature;
use crate::domain::ports::{CodeGenerator, FixSuggester, GenerationRequest};

type Responder = dyn Fn(&GenerationRequest) -> GeneratorResult<String> + Send + Sync;
type Suggester = dyn Fn(&ErrorSignature) -> GeneratorResult<Option<String>> + Send + Sync;

/// Generator answering from a closure and recording every request.
pub struct ScriptedCodeGenerator {
    responder: Arc<Responder>,
    suggester: Option<Arc<Suggester>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedCodeGenerator {
    pub fn new(responder: impl Fn(&GenerationRequest) -> GeneratorResult<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            suggester: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Generator that always returns code printing the task description.
    pub fn echo() -> Self {
        Self::new(|request| Ok(format!("# print: {}\nprint({:?})\n", request.description, request.description)))
    }

    /// Also act as a fix suggester.
    pub fn with_suggester(
        mut self,
        suggester: impl Fn(&ErrorSignature) -> GeneratorResult<Option<String>> + Send + Sync + 'static,
    ) -> Self {
        self.suggester = Some(Arc::new(suggester));
        self
    }

    /// Every request received so far, in call order.
    pub async fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().await.clone()
    }

    /// Requests made for one task key.
    pub async fn requests_for(&self, task_key: &str) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.task_key == task_key)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CodeGenerator for ScriptedCodeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> GeneratorResult<String> {
        self.requests.lock().await.push(request.clone());
        (self.responder)(request)
    }
}

#[async_trait]
impl FixSuggester for ScriptedCodeGenerator {
    async fn suggest_fix(&self, signature: &ErrorSignature, _failing_code: &str) -> GeneratorResult<Option<String>> {
        match &self.suggester {
            Some(suggester) => suggester(signature),
            None => Ok(None),
        }
    }
}
