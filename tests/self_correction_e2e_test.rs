//! End-to-end self-correction scenario: one task learns a fix, a sibling
//! with the same failure gets it as a hint.

mod common;

use std::sync::Arc;

use forgeloop::adapters::generators::ScriptedCodeGenerator;
use forgeloop::domain::models::{
    ErrorSignature, FailureCategory, LifecyclePoint, PlanStatus, TaskDescriptor, TaskStatus,
};
use forgeloop::domain::ports::{KnowledgeBackend, PlanRepository};
use tokio_util::sync::CancellationToken;

use common::{scripted_sandbox, TestEnv};

const IMPORT_FAILURE: &str = "# fail: E_IMPORT: cannot import helper";

fn scenario_generator() -> Arc<ScriptedCodeGenerator> {
    Arc::new(ScriptedCodeGenerator::new(|request| {
        Ok(match request.task_key.as_str() {
            "T2" => "# print: helper imported\n".to_string(),
            "T3" => IMPORT_FAILURE.to_string(),
            other => format!("# print: {other}\n"),
        })
    }))
}

fn scenario() -> Vec<TaskDescriptor> {
    vec![
        TaskDescriptor::new("T1", "load the input").with_code("# print: loaded\n"),
        TaskDescriptor::new("T2", "use the helper")
            .depends_on("T1")
            .with_code(IMPORT_FAILURE),
        TaskDescriptor::new("T3", "use the helper again")
            .depends_on("T1")
            .with_code(IMPORT_FAILURE),
    ]
}

#[tokio::test]
async fn test_fix_learned_by_one_task_is_offered_to_the_next() {
    let env = TestEnv::new().await;
    let generator = scenario_generator();
    let scheduler = env.scheduler(generator.clone(), scripted_sandbox(), 1, 2);

    let summary = scheduler
        .execute("import helpers", &scenario(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status, PlanStatus::Completed);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.blocked, 1);

    let tasks = env.repository.load_tasks(summary.plan_id).await.unwrap();
    assert_eq!(tasks[0].status, TaskStatus::Succeeded);
    assert_eq!(tasks[0].attempt_count, 1);
    assert_eq!(tasks[1].status, TaskStatus::Succeeded);
    assert_eq!(tasks[1].attempt_count, 2);
    assert_eq!(tasks[2].status, TaskStatus::Blocked);
    assert_eq!(tasks[2].attempt_count, 2);

    // T2 found nothing, regenerated, and recorded what worked.
    let t2_requests = generator.requests_for("T2").await;
    assert_eq!(t2_requests.len(), 1);
    assert!(t2_requests[0].knowledge_hint().is_none());

    let signature = ErrorSignature::normalize(FailureCategory::RuntimeError, "E_IMPORT: cannot import helper");
    let entry = env
        .sqlite_knowledge
        .lookup(&signature)
        .await
        .unwrap()
        .expect("entry for E_IMPORT");
    assert_eq!(entry.parsed.error_class, "E_IMPORT");
    assert!(entry.success_count >= 1);
    assert!(env.memory_knowledge.lookup(&signature).await.unwrap().is_some());

    // T3 hit the same failure and was handed T2's fix.
    let t3_requests = generator.requests_for("T3").await;
    assert_eq!(t3_requests.len(), 1);
    let hint = t3_requests[0].knowledge_hint().expect("hint from T2's fix");
    assert_eq!(hint.description, entry.fix_description);

    // Both T3 attempts are in its history.
    let history = env.repository.outcomes_for_task(tasks[2].id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|o| o.category == Some(FailureCategory::RuntimeError)));
}

#[tokio::test]
async fn test_report_covers_every_lifecycle_point_once() {
    let env = TestEnv::new().await;
    let scheduler = env.scheduler(scenario_generator(), scripted_sandbox(), 1, 2);
    let summary = scheduler
        .execute("import helpers", &scenario(), CancellationToken::new())
        .await
        .unwrap();

    let records = env.emitter.records(summary.plan_id).await.unwrap();
    let overviews = records.iter().filter(|r| matches!(r.point, LifecyclePoint::Overview)).count();
    let fragments = records.iter().filter(|r| matches!(r.point, LifecyclePoint::TaskFragment { .. })).count();
    let summaries = records.iter().filter(|r| matches!(r.point, LifecyclePoint::Summary)).count();
    let files = records.iter().filter(|r| matches!(r.point, LifecyclePoint::GeneratedFile { .. })).count();
    assert_eq!(overviews, 1);
    assert_eq!(fragments, 3);
    assert_eq!(summaries, 1);
    // T1 once, T2 twice, T3 twice
    assert_eq!(files, 5);

    let report = std::fs::read_to_string(env.emitter.report_path(summary.plan_id)).unwrap();
    assert!(report.contains("import helpers"));
    assert!(report.contains("T3"));
}
