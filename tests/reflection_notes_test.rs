//! Reflection notes written after one plan reach the generator in the next.

mod common;

use std::sync::Arc;

use forgeloop::adapters::generators::ScriptedCodeGenerator;
use forgeloop::domain::models::{ErrorSignature, FailureCategory, PlanStatus, TaskDescriptor};
use forgeloop::domain::ports::KnowledgeBackend;
use forgeloop::services::{ReflectionDaemon, ReflectionDaemonConfig};
use tokio_util::sync::CancellationToken;

use common::{scripted_sandbox, TestEnv};

const IMPORT_FAILURE: &str = "# fail: E_IMPORT: cannot import helper";

fn failing_generator() -> Arc<ScriptedCodeGenerator> {
    Arc::new(ScriptedCodeGenerator::new(|_| Ok(IMPORT_FAILURE.to_string())))
}

#[tokio::test]
async fn test_note_from_one_plan_reaches_next_plans_regeneration() {
    let env = TestEnv::new().await;
    let signature = ErrorSignature::normalize(FailureCategory::RuntimeError, "E_IMPORT: cannot import helper");

    let first_generator = failing_generator();
    let first = env
        .scheduler(first_generator.clone(), scripted_sandbox(), 1, 2)
        .execute(
            "first plan",
            &[TaskDescriptor::new("A", "use the helper").with_code(IMPORT_FAILURE)],
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(first.status, PlanStatus::Completed);
    assert_eq!(first.blocked, 1);

    // No note existed while the first plan ran.
    let first_requests = first_generator.requests_for("A").await;
    assert_eq!(first_requests.len(), 1);
    assert!(first_requests[0].previous.as_ref().unwrap().reflection_note.is_none());

    let daemon = ReflectionDaemon::new(
        env.repository.clone(),
        env.knowledge.clone(),
        ReflectionDaemonConfig::default(),
        CancellationToken::new(),
    );
    let report = daemon.run_once().await.unwrap();
    assert_eq!(report.signatures, 1);
    assert!(env.sqlite_knowledge.note_for(&signature.key()).await.unwrap().is_some());

    let second_generator = failing_generator();
    env.scheduler(second_generator.clone(), scripted_sandbox(), 1, 2)
        .execute(
            "second plan",
            &[TaskDescriptor::new("B", "use the helper elsewhere").with_code(IMPORT_FAILURE)],
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let second_requests = second_generator.requests_for("B").await;
    assert_eq!(second_requests.len(), 1);
    let note = second_requests[0]
        .previous
        .as_ref()
        .and_then(|p| p.reflection_note.clone())
        .expect("note from the first plan");
    assert!(note.contains("seen 2 time(s) across 1 task(s), 0 recovered"));
}

#[tokio::test]
async fn test_repeated_reflection_keeps_one_note_per_signature() {
    let env = TestEnv::new().await;
    env.scheduler(failing_generator(), scripted_sandbox(), 1, 3)
        .execute(
            "plan",
            &[TaskDescriptor::new("A", "use the helper").with_code(IMPORT_FAILURE)],
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let daemon = ReflectionDaemon::new(
        env.repository.clone(),
        env.knowledge.clone(),
        ReflectionDaemonConfig::default(),
        CancellationToken::new(),
    );
    for _ in 0..3 {
        daemon.run_once().await.unwrap();
    }

    assert_eq!(env.sqlite_knowledge.recent_notes(10).await.unwrap().len(), 1);
    assert_eq!(env.memory_knowledge.recent_notes(10).await.unwrap().len(), 1);
}
