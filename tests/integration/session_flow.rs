//! End-to-end session tests: plan, execute, gate, pause or finalize.

use std::sync::Arc;

use serde_json::json;

use quest::core::{TaskId, TaskStatus};
use quest::orchestration::{ConflictKind, FALLBACK_TASK_COUNT};
use quest::{CollaboratorError, Driver, Error, Outcome, Phase};

use crate::fixtures::{
    driver, CountingRetriever, ScriptedAnalyzer, ScriptedPlanner, Sources, LINEAR_WITH_REVIEW,
    TWO_STEP,
};

fn status(session: &quest::Session, id: &str) -> TaskStatus {
    session
        .plan
        .as_ref()
        .and_then(|p| p.task(&TaskId::from(id)))
        .map(|t| t.status)
        .unwrap()
}

/// Given a plan with review forced after t2
/// When the session runs
/// Then it pauses with t1 and t2 done and t3 untouched
#[tokio::test]
async fn test_pauses_after_checkpoint_task() {
    let sources = Sources::new();
    let driver = driver(LINEAR_WITH_REVIEW, &sources, None);
    let mut session = driver.start("What drives IPF?");

    let outcome = driver.run(&mut session).await.unwrap();
    let Outcome::Paused(checkpoint) = outcome else {
        panic!("expected a pause, got {:?}", outcome);
    };

    assert_eq!(status(&session, "t1"), TaskStatus::Completed);
    assert_eq!(status(&session, "t2"), TaskStatus::Completed);
    assert_eq!(status(&session, "t3"), TaskStatus::Pending);
    assert_eq!(sources.genes.calls(), 1);
    assert_eq!(sources.evidence.calls(), 1);

    assert_eq!(session.phase(), Phase::Checkpointing);
    assert_eq!(session.status(), "awaiting_response");
    assert_eq!(
        session.pending_checkpoint.as_ref().map(|c| &c.id),
        Some(&checkpoint.id)
    );

    assert!(checkpoint.conflicts.is_empty());
    assert!(checkpoint.reason.starts_with("Research checkpoint"));
    let ids: Vec<&str> = checkpoint.options.iter().map(|o| o.action_id.as_str()).collect();
    assert_eq!(ids, vec!["continue", "skip:genes", "stop_and_export", "abort"]);
    assert_eq!(checkpoint.session_id(), session.id);
    assert_eq!(checkpoint.state_snapshot.findings.len(), 2);
}

/// Given the first task fails and the analyzer sees nothing to review
/// When the session runs
/// Then the dependent task never starts and the session still finalizes
#[tokio::test]
async fn test_failed_task_blocks_dependent_and_finalizes() {
    let evidence = CountingRetriever::records(vec![json!({"id": 1})]);
    let driver = Driver::builder()
        .planner(ScriptedPlanner::text(TWO_STEP))
        .retriever("genes", CountingRetriever::failing("upstream timeout"))
        .retriever("evidence", evidence.clone())
        .analyzer(ScriptedAnalyzer::clear())
        .build();
    let mut session = driver.start("What drives IPF?");

    let outcome = driver.run(&mut session).await.unwrap();
    let Outcome::Finalized(report) = outcome else {
        panic!("expected finalization, got {:?}", outcome);
    };

    assert_eq!(status(&session, "t1"), TaskStatus::Failed);
    assert_eq!(status(&session, "t2"), TaskStatus::Pending);
    assert_eq!(evidence.calls(), 0);
    assert!(session.findings.is_empty());

    assert!(report.degraded);
    assert!(report.text.contains("## Failed Tasks"));
    assert!(report.text.contains("- t1: upstream timeout"));
    assert_eq!(session.phase(), Phase::Finalized);
}

/// Given a failing task and no analyzer
/// When the gate runs
/// Then the rule-based check reports the failure for review
#[tokio::test]
async fn test_failed_task_without_analyzer_pauses() {
    let driver = Driver::builder()
        .planner(ScriptedPlanner::text(TWO_STEP))
        .retriever("genes", CountingRetriever::failing("rate limited"))
        .retriever("evidence", CountingRetriever::empty())
        .build();
    let mut session = driver.start("What drives IPF?");

    let Outcome::Paused(checkpoint) = driver.run(&mut session).await.unwrap() else {
        panic!("expected a pause");
    };
    assert_eq!(checkpoint.conflicts.len(), 1);
    assert_eq!(checkpoint.conflicts[0].kind, ConflictKind::QualityFailure);
    assert_eq!(checkpoint.conflicts[0].affected_task_ids, vec![TaskId::from("t1")]);
    assert!(checkpoint.conflicts[0].description.contains("rate limited"));
}

/// Given a planner that returns garbage
/// When the session runs
/// Then the fallback plan is used and review is forced after its second task
#[tokio::test]
async fn test_malformed_plan_uses_fallback() {
    let clingen = CountingRetriever::records(vec![json!({"gene": "MUC5B"})]);
    let civic = CountingRetriever::records(vec![json!({"evidence": "EID1"})]);
    let openalex = CountingRetriever::records(vec![json!({"author": "A"})]);
    let driver = Driver::builder()
        .planner(ScriptedPlanner::text("I could not produce a plan, sorry."))
        .retriever("clingen", clingen.clone())
        .retriever("civic", civic.clone())
        .retriever("openalex", openalex.clone())
        .build();
    let mut session = driver.start("Idiopathic pulmonary fibrosis genetics");

    let outcome = driver.run(&mut session).await.unwrap();
    assert!(matches!(outcome, Outcome::Paused(_)));

    let plan = session.plan.as_ref().unwrap();
    assert_eq!(plan.len(), FALLBACK_TASK_COUNT);
    let ids: Vec<&str> = plan.tasks().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["task_1", "task_2", "task_3"]);
    assert_eq!(plan.checkpoint_after(), Some(&TaskId::from("task_2")));

    assert_eq!(clingen.calls(), 1);
    assert_eq!(civic.calls(), 1);
    assert_eq!(openalex.calls(), 0);

    let params = &clingen.seen()[0];
    assert_eq!(params["query_type"], json!("gene_disease"));
    assert_eq!(params["entities"], json!(["Idiopathic", "pulmonary", "fibrosis"]));
}

/// Given a planner error or a cyclic plan
/// When the session plans
/// Then both fall back to the default plan
#[tokio::test]
async fn test_planner_error_and_cycle_fall_back() {
    let cyclic = r#"{"tasks": [
        {"id": "a", "source": "genes", "depends_on": ["b"]},
        {"id": "b", "source": "genes", "depends_on": ["a"]}
    ]}"#;
    for planner in [
        Arc::new(ScriptedPlanner(Err(CollaboratorError::Unavailable("offline".into())))),
        ScriptedPlanner::text(cyclic),
    ] {
        let driver = Driver::builder().planner(planner).build();
        let mut session = driver.start("BRCA1");
        driver.run(&mut session).await.unwrap();

        let plan = session.plan.as_ref().unwrap();
        assert_eq!(plan.len(), FALLBACK_TASK_COUNT);
        assert_eq!(plan.tasks()[0].source, "clingen");
    }
}

/// Given the analyzer is down and one completed task returned nothing
/// When the gate runs
/// Then exactly one Missing conflict is raised and review is required
#[tokio::test]
async fn test_analyzer_failure_falls_back_to_rules() {
    let driver = Driver::builder()
        .planner(ScriptedPlanner::text(TWO_STEP))
        .retriever("genes", CountingRetriever::empty())
        .retriever("evidence", CountingRetriever::records(vec![json!({"id": 7})]))
        .analyzer(ScriptedAnalyzer::unavailable())
        .build();
    let mut session = driver.start("What drives IPF?");

    let Outcome::Paused(checkpoint) = driver.run(&mut session).await.unwrap() else {
        panic!("expected a pause");
    };

    assert_eq!(checkpoint.conflicts.len(), 1);
    let conflict = &checkpoint.conflicts[0];
    assert_eq!(conflict.kind, ConflictKind::Missing);
    assert_eq!(conflict.affected_task_ids, vec![TaskId::from("t1")]);
    assert_eq!(checkpoint.reason, "Found 1 potential issue(s) requiring review");
    assert_eq!(session.conflicts.len(), 1);
}

/// Given an analyzer that requests review but lists no conflicts
/// When the gate runs
/// Then the session pauses before finalizing
#[tokio::test]
async fn test_review_request_without_conflicts_pauses() {
    let driver = Driver::builder()
        .planner(ScriptedPlanner::text(TWO_STEP))
        .retriever("genes", CountingRetriever::records(vec![json!({"gene": "MUC5B"})]))
        .retriever("evidence", CountingRetriever::records(vec![json!({"id": 7})]))
        .analyzer(ScriptedAnalyzer::review_only())
        .build();
    let mut session = driver.start("What drives IPF?");

    let outcome = driver.run(&mut session).await.unwrap();
    let Outcome::Paused(checkpoint) = outcome else {
        panic!("expected a pause, got {:?}", outcome);
    };

    assert_eq!(session.phase(), Phase::Checkpointing);
    assert!(checkpoint.conflicts.is_empty());
    assert!(checkpoint.reason.starts_with("Research checkpoint"));
    assert!(session.report.is_none());
}

/// Given a paused session
/// When run is called again or an unknown action is sent
/// Then the call is rejected and the session is unchanged
#[tokio::test]
async fn test_paused_session_rejects_run_and_unknown_action() {
    let sources = Sources::new();
    let driver = driver(LINEAR_WITH_REVIEW, &sources, None);
    let mut session = driver.start("What drives IPF?");
    let Outcome::Paused(checkpoint) = driver.run(&mut session).await.unwrap() else {
        panic!("expected a pause");
    };
    let before = session.clone();

    let err = driver.run(&mut session).await.unwrap_err();
    assert!(matches!(err, Error::AwaitingResponse(_)));

    let err = driver
        .resume(&mut session, quest::CheckpointResponse::new("retry_everything"))
        .await
        .unwrap_err();
    match err {
        Error::UnknownAction { checkpoint: id, action } => {
            assert_eq!(id, checkpoint.id.to_string());
            assert_eq!(action, "retry_everything");
        }
        other => panic!("expected UnknownAction, got {:?}", other),
    }

    assert_eq!(session, before);
    assert_eq!(sources.genes.calls(), 1);
    let stored = driver.checkpoints().load(&checkpoint.id).await.unwrap().unwrap();
    assert!(!stored.is_resolved());
}

/// Given t2 and t3 both waiting on t1, review forced after t1, batch mode
/// When t1 completes
/// Then the session pauses before either t2 or t3 runs
#[tokio::test]
async fn test_review_precedes_eligible_fan_out() {
    let fan_out = r#"{
      "tasks": [
        {"id": "t1", "source": "genes"},
        {"id": "t2", "source": "evidence", "depends_on": ["t1"]},
        {"id": "t3", "source": "evidence", "depends_on": ["t1"]}
      ],
      "checkpoint_after": "t1"
    }"#;
    let sources = Sources::new();
    let driver = Driver::builder()
        .planner(ScriptedPlanner::text(fan_out))
        .retriever("genes", sources.genes.clone())
        .retriever("evidence", sources.evidence.clone())
        .execution_mode(quest::ExecutionMode::Batch { max_parallel: 4 })
        .build();
    let mut session = driver.start("What drives IPF?");

    let outcome = driver.run(&mut session).await.unwrap();

    assert!(matches!(outcome, Outcome::Paused(_)));
    assert_eq!(session.phase(), Phase::Checkpointing);
    assert_eq!(status(&session, "t1"), TaskStatus::Completed);
    assert_eq!(status(&session, "t2"), TaskStatus::Pending);
    assert_eq!(status(&session, "t3"), TaskStatus::Pending);
    assert_eq!(sources.evidence.calls(), 0);
}

#[tokio::test]
async fn test_gate_verdict_with_failed_analyzer() {
    use quest::core::{Findings, Plan, Task};
    use quest::orchestration::{ConsistencyGate, GateLimits, VerdictSource};

    let mut plan = Plan::new(
        "IPF",
        vec![
            Task::new("t1", "genes", "genes"),
            Task::new("t2", "evidence", "evidence"),
        ],
        None,
    )
    .unwrap();
    let mut findings = Findings::new();
    for (id, result) in [("t1", json!([])), ("t2", json!([{"id": 1}]))] {
        let task = plan.task_mut(&TaskId::from(id)).unwrap();
        task.mark_ready().unwrap();
        task.start().unwrap();
        task.complete(result.clone()).unwrap();
        findings.record(TaskId::from(id), result).unwrap();
    }

    let gate = ConsistencyGate::new(Some(ScriptedAnalyzer::unavailable()), GateLimits::default());
    let verdict = gate.evaluate(&plan, &findings).await;

    assert!(verdict.requires_review);
    assert_eq!(verdict.source, VerdictSource::RuleBased);
    assert_eq!(verdict.conflicts.len(), 1);
    assert_eq!(verdict.conflicts[0].kind, ConflictKind::Missing);
}
